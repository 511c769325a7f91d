mod cache;
mod common;
mod gc;
mod layout;
mod scenarios;
mod tarball;
