pub mod graph_io;
pub mod training;
