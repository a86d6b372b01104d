pub mod answer;
pub mod assessment;
pub mod attempt;
pub mod question;
pub mod suspicious_activity;
pub mod user;
