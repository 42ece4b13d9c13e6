//! Call sites that configure a descriptor and execute it against a transport service.

pub mod kv;
pub mod management;
pub mod query;
pub mod search;
