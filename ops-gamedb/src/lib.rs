mod chunk;
mod reader;

pub use reader::GameDbReader;
