//! 설정 모듈

pub mod db;

pub use db::DbConfig;
