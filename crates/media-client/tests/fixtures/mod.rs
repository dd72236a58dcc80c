//! Shared fixtures for media client integration tests

#![allow(dead_code)]

pub mod endpoints;
pub mod mock_media_server;
