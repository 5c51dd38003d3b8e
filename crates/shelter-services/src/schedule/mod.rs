mod service;

pub use service::ScheduleController;
