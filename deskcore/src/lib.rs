pub mod buffer_json;
pub mod channel;
pub mod creds;
pub mod crypto;
pub mod jid;
pub mod keys;
pub mod media;
pub mod poll;
pub mod store;
