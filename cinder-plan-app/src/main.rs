//! 渲染图 dry-run 入口
//!
//! 用法：`cinder-plan [frame_count]`，日志等级由 `RUST_LOG` 控制。

mod passes;
mod plan_app;

use plan_app::PlanApp;

fn main() -> anyhow::Result<()> {
    cinder_crate_tools::init_log::init_log();

    let frame_count = match std::env::args().nth(1) {
        Some(arg) => arg.parse::<u64>()?,
        None => 6,
    };

    let mut app = PlanApp::new()?;
    app.print_plan();
    app.run(frame_count)?;
    Ok(())
}
