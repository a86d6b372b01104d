pub mod attempt_service;
pub mod grading_service;
pub mod proctor_service;
pub mod sweeper_service;
