pub mod history_service;
pub mod report_service;
