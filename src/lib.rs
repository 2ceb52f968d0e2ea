// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Versioned configuration environments.
//!
//! Oxiconf answers `(application, profile, label)` requests with an
//! __environment__: an ordered listing of property sources, highest
//! precedence first, read out of configuration files.
//!
//! # Labels and Working Copies
//!
//! Configuration files usually live in git repositories. Oxiconf keeps a
//! local __working copy__ of each repository, and treats the label of a
//! request as a branch, tag, or commit to check out before reading files. The
//! remote always wins. Local history that cannot be fast-forwarded is
//! discarded.
//!
//! # Assembling a Server
//!
//! A [`ServerConfig`] lists every backend. [`CompositeRepository::from_config`]
//! turns it into one [`EnvironmentRepository`] that fans requests out to each
//! backend in ascending order.
//!
//! [`ServerConfig`]: crate::config::ServerConfig
//! [`CompositeRepository::from_config`]: crate::repo::composite::CompositeRepository::from_config
//! [`EnvironmentRepository`]: crate::repo::EnvironmentRepository

pub mod config;
pub mod environment;
pub mod locations;
pub mod path;
pub mod repo;
pub mod store;
