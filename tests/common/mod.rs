#![allow(dead_code)]

pub mod test_entity;
pub mod test_repos;
