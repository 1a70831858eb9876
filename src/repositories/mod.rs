pub(crate) mod access_tokens;
pub(crate) mod admins;
pub(crate) mod health;
pub(crate) mod submission_files;
pub(crate) mod submissions;
pub(crate) mod violations;
