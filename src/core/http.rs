use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = concat!("DuckCoding/", env!("CARGO_PKG_VERSION"));

/// 构建下载运行时使用的 HTTP 客户端
///
/// 不设置整体超时（大文件下载可能持续数分钟），只限制连接阶段与单次读取的等待时间，
/// 数据流停滞超过 `read_timeout` 即视为中断；
/// 代理沿用进程环境变量（HTTP_PROXY/HTTPS_PROXY/ALL_PROXY）。
pub fn build_http_client(
    connect_timeout: Duration,
    read_timeout: Duration,
) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .read_timeout(read_timeout)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
}
