/*
 * Copyright (C) 2026 Fastly, Inc.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use config::{Config, ConfigError, File, FileFormat};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Gateway {
    pub http_addr: String,
    pub http_port: u16,
    pub listen_backlog: u32,
    pub maxconn: u32,
    pub buffer_size: u32,
    pub broker_spec: String,
    pub broker_bind: bool,
    pub write_timeout: u32,
}

impl Default for Gateway {
    fn default() -> Self {
        Self {
            http_addr: String::from("0.0.0.0"),
            http_port: 9393,
            listen_backlog: 500,
            maxconn: 100,
            buffer_size: 1024,
            broker_spec: String::from("tcp://127.0.0.1:9292"),
            broker_bind: false,
            write_timeout: 5,
        }
    }
}

impl From<Gateway> for config::ValueKind {
    fn from(gateway: Gateway) -> Self {
        let mut properties = HashMap::new();
        properties.insert(
            "http_addr".to_string(),
            config::Value::from(gateway.http_addr),
        );
        properties.insert(
            "http_port".to_string(),
            config::Value::from(gateway.http_port),
        );
        properties.insert(
            "listen_backlog".to_string(),
            config::Value::from(gateway.listen_backlog),
        );
        properties.insert("maxconn".to_string(), config::Value::from(gateway.maxconn));
        properties.insert(
            "buffer_size".to_string(),
            config::Value::from(gateway.buffer_size),
        );
        properties.insert(
            "broker_spec".to_string(),
            config::Value::from(gateway.broker_spec),
        );
        properties.insert(
            "broker_bind".to_string(),
            config::Value::from(gateway.broker_bind),
        );
        properties.insert(
            "write_timeout".to_string(),
            config::Value::from(gateway.write_timeout),
        );

        Self::Table(properties)
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
pub struct CustomConfig {
    pub gateway: Gateway,
}

impl CustomConfig {
    /// Reads an INI file over the built-in defaults. Keys missing from the
    /// file keep their default values. With no file, only the defaults
    /// are used.
    pub fn new(config_file: Option<&Path>) -> Result<CustomConfig, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Ini));
        }

        let config = builder
            .set_default("gateway", Gateway::default())?
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = CustomConfig::new(None).unwrap();
        assert_eq!(config.gateway, Gateway::default());
        assert_eq!(config.gateway.http_port, 9393);
        assert_eq!(config.gateway.broker_spec, "tcp://127.0.0.1:9292");
    }

    #[test]
    fn test_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[gateway]\n\
             http_port=8080\n\
             maxconn=2\n\
             broker_spec=ipc:///tmp/qgate-broker\n\
             broker_bind=true\n"
        )
        .unwrap();

        let config = CustomConfig::new(Some(file.path())).unwrap();

        let expected = Gateway {
            http_port: 8080,
            maxconn: 2,
            broker_spec: "ipc:///tmp/qgate-broker".to_string(),
            broker_bind: true,
            ..Gateway::default()
        };
        assert_eq!(config.gateway, expected);
    }

    #[test]
    fn test_errors() {
        assert!(CustomConfig::new(Some(Path::new("no/such/file.conf"))).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nhttp_port=notaport\n").unwrap();

        assert!(CustomConfig::new(Some(file.path())).is_err());
    }
}
