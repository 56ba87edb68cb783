#![forbid(unsafe_code)]
#![forbid(non_ascii_idents)]

pub mod dit;
pub mod types;
