//! 服务端配置
//!
//! 默认值来自 protocol 常量；位置参数覆盖地址和起始端口，
//! 环境变量覆盖超时。

use std::time::Duration;

use anyhow::{bail, Context, Result};
use protocol::{DEFAULT_CONTROL_PORT, FIRST_ROOM_PORT, JOIN_TIMEOUT};

/// 加入超时（秒）环境变量
pub const JOIN_TIMEOUT_ENV: &str = "ROOM_JOIN_TIMEOUT_SECS";

/// 房间空闲超时（秒）环境变量，0 表示关闭
pub const IDLE_TIMEOUT_ENV: &str = "ROOM_IDLE_TIMEOUT_SECS";

/// 服务端配置
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// 控制端口监听地址
    pub control_addr: String,
    /// 房间监听的主机地址
    pub room_host: String,
    /// 第一个房间端口
    pub first_room_port: u16,
    /// 读取用户名的超时
    pub join_timeout: Duration,
    /// 房间空闲多久后关闭，None 表示永不关闭
    pub room_idle_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            control_addr: format!("0.0.0.0:{}", DEFAULT_CONTROL_PORT),
            room_host: "0.0.0.0".to_string(),
            first_room_port: FIRST_ROOM_PORT,
            join_timeout: JOIN_TIMEOUT,
            room_idle_timeout: None,
        }
    }
}

impl ServerConfig {
    /// 从命令行参数构造：`chat-server [control_addr] [first_room_port]`
    ///
    /// `args` 不包含程序名。
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = Self::default();
        let mut args = args.into_iter();

        if let Some(addr) = args.next() {
            config.control_addr = addr;
        }
        if let Some(port) = args.next() {
            config.first_room_port = port
                .parse()
                .with_context(|| format!("invalid first room port: {}", port))?;
        }
        if let Some(extra) = args.next() {
            bail!("unexpected argument: {}", extra);
        }

        Ok(config)
    }

    /// 用环境变量覆盖超时配置
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup(JOIN_TIMEOUT_ENV) {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid {}: {}", JOIN_TIMEOUT_ENV, secs))?;
            if secs == 0 {
                bail!("{} must be greater than 0", JOIN_TIMEOUT_ENV);
            }
            self.join_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup(IDLE_TIMEOUT_ENV) {
            let secs: u64 = secs
                .parse()
                .with_context(|| format!("invalid {}: {}", IDLE_TIMEOUT_ENV, secs))?;
            self.room_idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_args(args(&[])).unwrap();
        assert_eq!(config.control_addr, "0.0.0.0:3941");
        assert_eq!(config.first_room_port, 8888);
        assert_eq!(config.join_timeout, JOIN_TIMEOUT);
        assert!(config.room_idle_timeout.is_none());
    }

    #[test]
    fn test_positional_args() {
        let config = ServerConfig::from_args(args(&["127.0.0.1:4000", "9000"])).unwrap();
        assert_eq!(config.control_addr, "127.0.0.1:4000");
        assert_eq!(config.first_room_port, 9000);
    }

    #[test]
    fn test_invalid_port() {
        assert!(ServerConfig::from_args(args(&["127.0.0.1:4000", "port"])).is_err());
        assert!(ServerConfig::from_args(args(&["127.0.0.1:4000", "70000"])).is_err());
    }

    #[test]
    fn test_extra_argument() {
        assert!(ServerConfig::from_args(args(&["a:1", "9000", "x"])).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::default()
            .with_env(|key| match key {
                JOIN_TIMEOUT_ENV => Some("5".to_string()),
                IDLE_TIMEOUT_ENV => Some("60".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.join_timeout, Duration::from_secs(5));
        assert_eq!(config.room_idle_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_idle_timeout_zero_disables() {
        let config = ServerConfig::default()
            .with_env(|key| (key == IDLE_TIMEOUT_ENV).then(|| "0".to_string()))
            .unwrap();
        assert!(config.room_idle_timeout.is_none());
    }

    #[test]
    fn test_invalid_env() {
        assert!(ServerConfig::default()
            .with_env(|key| (key == JOIN_TIMEOUT_ENV).then(|| "0".to_string()))
            .is_err());
        assert!(ServerConfig::default()
            .with_env(|key| (key == IDLE_TIMEOUT_ENV).then(|| "soon".to_string()))
            .is_err());
    }
}
