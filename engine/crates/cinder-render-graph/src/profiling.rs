/// 只有在 tracy client 运行时才创建 span，否则什么都不做
///
/// `tracy_client::span!` 在没有 client 时会 panic，测试和 headless 运行不会启动 client
macro_rules! rg_span {
    ($name:expr) => {
        tracy_client::Client::running().map(|client| client.span_alloc(Some($name), "", file!(), line!(), 0))
    };
}

pub(crate) use rg_span;
