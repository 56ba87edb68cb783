pub mod codec;
pub(crate) mod compare;
pub mod core;
pub(crate) mod handler;
pub(crate) mod modify;
pub(crate) mod password;
pub(crate) mod search;
pub(crate) mod session;

pub use codec::{DirectoryCodec, LdapRequest, RequestControl};
pub use core::{
    error::{LdapError, LdapResult},
    utils::LdapInfo,
};
pub use handler::{DirectoryContext, LdapHandler, LdapResponse};
pub use search::{Phase, SearchCursor, PAGED_RESULTS_OID};
pub use session::Session;
