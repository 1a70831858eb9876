pub(crate) mod file_store;
pub(crate) mod mail_relay;
pub(crate) mod submission_recorder;
pub(crate) mod token_registry;
