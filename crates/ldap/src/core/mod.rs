pub mod attributes;
pub mod dn;
pub mod error;
pub mod filter;
pub mod utils;
