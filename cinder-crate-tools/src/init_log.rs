use std::io::Write;

use env_logger::fmt::Formatter;

/// 按等级挑选颜色：Info 绿色，Warn 黄色，Error 红色，其余使用默认样式
fn level_style(buf: &Formatter, level: log::Level) -> anstyle::Style {
    let color = match level {
        log::Level::Error => Some(anstyle::AnsiColor::Red),
        log::Level::Warn => Some(anstyle::AnsiColor::Yellow),
        log::Level::Info => Some(anstyle::AnsiColor::Green),
        log::Level::Debug | log::Level::Trace => None,
    };
    match color {
        Some(color) => buf.default_level_style(level).fg_color(Some(anstyle::Color::Ansi(color))),
        None => buf.default_level_style(level),
    }
}

fn build_logger(default_level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let level_style = level_style(buf, record.level());
            let grey_style = anstyle::Style::new().fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
            let level = record.level();
            let module = record.module_path().unwrap_or("");

            writeln!(
                buf,
                "{level_style}[{time}] {level}: {}{level_style:#}\n\t {grey_style}In {module} At {file}:{line}{grey_style:#}",
                record.args()
            )
        })
        .filter(None, default_level)
        // RUST_LOG 优先于默认等级
        .parse_default_env();
    builder
}

/// 初始化全局 logger，默认等级 Info，可以通过 `RUST_LOG` 覆盖
pub fn init_log() {
    build_logger(log::LevelFilter::Info).init();
}

/// 与 [`init_log`] 相同，但允许重复调用（测试中多个用例共享同一个进程）
pub fn try_init_log(default_level: log::LevelFilter) -> bool {
    build_logger(default_level).try_init().is_ok()
}
