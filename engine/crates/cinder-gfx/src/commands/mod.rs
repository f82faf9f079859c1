pub mod barrier;
pub mod render_pass_begin;
pub mod submit_info;
