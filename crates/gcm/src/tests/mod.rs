//! Supervisor and client tests against scripted mock transports


mod supervisor_tests;
