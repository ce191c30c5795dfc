pub mod bradley_terry;
pub mod calibration;
pub mod committee;
pub mod config;
pub mod forecast;
pub mod history;
pub mod markov;
pub mod meta;
pub mod patterns;
pub mod ratings_store;
pub mod risk;
pub mod score_dist;
pub mod window_prob;
