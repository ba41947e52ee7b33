//! Test suites for the sample service front end.

mod support;
