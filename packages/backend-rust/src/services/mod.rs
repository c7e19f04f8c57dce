pub mod children;
pub mod curriculum;
pub mod dictation;
pub mod families;
pub mod feedback;
pub mod reminders;
pub mod review;
pub mod statistics;
pub mod users;
