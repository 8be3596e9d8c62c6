//! Mirror a remote FTP directory tree onto local storage under bounded
//! concurrency. Built on the raw protocol engine in `sftpc-ftp`.

pub mod mirror;
