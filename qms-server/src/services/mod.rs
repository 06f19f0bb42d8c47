//! Business services shared by the HTTP handlers

pub mod audit_log;
pub mod backup;
pub mod evidence_pack;
pub mod pdf;
pub mod templating;
