// SPDX-License-Identifier: MIT

pub mod checkpoint;
pub mod runner;
pub mod service;
pub mod state;
pub mod step;
pub mod steps;
