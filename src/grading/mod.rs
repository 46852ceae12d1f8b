pub mod gradient;
pub mod scoring;
pub mod table_parser;
pub mod weights;
