pub mod country;
pub mod flow;

pub use country::{CountryIdentity, Iso3};
pub use flow::{DyadKey, FlowRecord, VariationSummary};
