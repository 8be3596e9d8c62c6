//! # sftpc – FTP
//!
//! Raw FTP client engine providing:
//!   • Control channel with multiline reply framing and reply-class checks
//!   • Passive (PASV/EPSV) and active (PORT/EPRT) data connections
//!   • Binary and text-mode retrieve/store with bounded line reads
//!   • MLSD machine-listing parsing into typed directory entries
//!   • Directory and metadata commands (CWD, PWD, SIZE, MKD, RMD, DELE, rename)

pub mod ftp;
