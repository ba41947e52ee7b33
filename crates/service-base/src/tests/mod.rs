//! Test suites for the service lifecycle library.

mod support;
mod unit;
