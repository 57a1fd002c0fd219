pub(crate) mod app;

pub(crate) mod keys;

pub(crate) mod logging;

pub(crate) mod mem_db;

pub(crate) mod network;
