mod batch;
mod command;
mod reporting;
mod watch;
