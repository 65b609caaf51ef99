mod common;

mod reschedule;
mod routing;
