//! Repository, user and per-repository build inputs

use serde::{Deserialize, Serialize};

/// A repository registered with the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Repo {
    pub id: i64,
    pub user_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub link: String,
    pub clone_url: String,
    /// Default branch
    pub branch: String,
    pub private: bool,
    pub timeout: i64,
}

/// An authenticated user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub login: String,
    pub email: String,
    pub admin: bool,
    #[serde(skip)]
    pub token: String,
}

/// A named secret exposed to a repository's builds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,
    #[serde(skip_serializing)]
    pub value: String,
}

/// Container registry credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub address: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

/// A raw pipeline configuration file as fetched from the forge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub id: i64,
    pub repo_id: i64,
    pub name: String,
    pub data: String,
}
