pub(crate) mod notifications;
