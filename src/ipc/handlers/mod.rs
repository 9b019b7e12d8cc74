pub mod announcements;
pub mod attendance;
pub mod auth;
pub mod calendar;
pub mod core;
pub mod exams;
pub mod feedback;
pub mod fees;
pub mod leaves;
pub mod results;
pub mod students;
pub mod teachers;
pub mod timetable;
