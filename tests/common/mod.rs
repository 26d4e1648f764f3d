#![allow(dead_code)]

pub mod counting_alloc;
pub mod fixtures;
