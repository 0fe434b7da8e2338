pub mod city;
pub mod user;
