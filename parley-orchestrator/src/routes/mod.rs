pub mod health;
pub mod meeting;
