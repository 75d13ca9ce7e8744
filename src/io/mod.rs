pub mod excel;
pub mod fetch;
pub mod output;
pub mod stata;
pub mod tabular;

pub use tabular::RawTable;
