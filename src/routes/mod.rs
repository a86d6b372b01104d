pub mod attempt;
pub mod health;
