pub mod line_handler;
