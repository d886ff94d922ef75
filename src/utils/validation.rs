use crate::error::{Error, Result};
use crate::models::FactorVector;

/// Checks a rating read from input before it becomes an edge weight.
pub fn validate_rating(line: usize, rating: f32) -> Result<()> {
    if !rating.is_finite() {
        return Err(Error::Parse {
            line,
            reason: format!("rating must be a finite number, got {}", rating),
        });
    }
    Ok(())
}

pub fn validate_factors(factors: &FactorVector, dim: usize) -> Result<()> {
    if factors.len() != dim {
        return Err(Error::DimensionMismatch {
            expected: dim,
            actual: factors.len(),
        });
    }

    if !factors.is_finite() {
        return Err(Error::InvalidParameter(
            "factor vector contains invalid values (NaN or Infinity)".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rating() {
        assert!(validate_rating(1, 4.5).is_ok());
        assert!(matches!(validate_rating(3, f32::NAN), Err(Error::Parse { line: 3, .. })));
    }

    #[test]
    fn test_validate_factors() {
        assert!(validate_factors(&FactorVector::from_vec(vec![0.1, 0.2]), 2).is_ok());
        assert!(matches!(
            validate_factors(&FactorVector::zeros(3), 2),
            Err(Error::DimensionMismatch { expected: 2, actual: 3 })
        ));
        assert!(validate_factors(&FactorVector::from_vec(vec![f32::INFINITY, 0.0]), 2).is_err());
    }
}
