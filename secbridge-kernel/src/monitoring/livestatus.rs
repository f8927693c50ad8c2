/**
 * LIVESTATUS CLIENT - Requêtes sur socket TCP ou Unix
 *
 * FONCTIONNEMENT :
 * - une connexion par requête : écriture de la requête, fermeture du sens
 *   écriture pour que le démon réponde puis ferme, lecture complète
 * - `ResponseHeader: fixed16` : une requête en échec revient avec un code
 *   de statut au lieu d'un corps vide
 * - `OutputFormat: json` : lignes zippées avec les colonnes demandées
 */
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::MonitoringClient;
use crate::config::MonitoringConf;
use crate::errors::TransportError;
use crate::models::Row;

const SERVICE: &str = "livestatus";
const HEADER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LivestatusAddress {
    Tcp(String),
    Unix(PathBuf),
}

impl LivestatusAddress {
    /// `host:port`, ou un chemin absolu (éventuellement préfixé `unix:`)
    pub fn parse(address: &str) -> Self {
        let address = address.trim();
        if let Some(path) = address.strip_prefix("unix:") {
            return LivestatusAddress::Unix(PathBuf::from(path));
        }
        if address.starts_with('/') {
            return LivestatusAddress::Unix(PathBuf::from(address));
        }
        LivestatusAddress::Tcp(address.to_string())
    }

    fn describe(&self) -> String {
        match self {
            LivestatusAddress::Tcp(addr) => addr.clone(),
            LivestatusAddress::Unix(path) => path.display().to_string(),
        }
    }
}

pub struct LivestatusClient {
    address: LivestatusAddress,
    timeout: Duration,
}

impl LivestatusClient {
    pub fn new(address: LivestatusAddress, timeout: Duration) -> Self {
        Self { address, timeout }
    }

    pub fn from_config(conf: &MonitoringConf) -> Self {
        Self::new(
            LivestatusAddress::parse(&conf.address),
            Duration::from_secs(conf.timeout_secs),
        )
    }

    fn exchange(&self, request: &str) -> Result<Vec<u8>, TransportError> {
        let io_err = |source| TransportError::Io {
            endpoint: self.address.describe(),
            source,
        };

        match &self.address {
            LivestatusAddress::Tcp(addr) => {
                let mut stream = connect_tcp(addr, self.timeout).map_err(io_err)?;
                stream.set_read_timeout(Some(self.timeout)).map_err(io_err)?;
                stream.set_write_timeout(Some(self.timeout)).map_err(io_err)?;
                stream.write_all(request.as_bytes()).map_err(io_err)?;
                stream.shutdown(Shutdown::Write).map_err(io_err)?;
                let mut response = Vec::new();
                stream.read_to_end(&mut response).map_err(io_err)?;
                Ok(response)
            }
            #[cfg(unix)]
            LivestatusAddress::Unix(path) => {
                use std::os::unix::net::UnixStream;
                let mut stream = UnixStream::connect(path).map_err(io_err)?;
                stream.set_read_timeout(Some(self.timeout)).map_err(io_err)?;
                stream.set_write_timeout(Some(self.timeout)).map_err(io_err)?;
                stream.write_all(request.as_bytes()).map_err(io_err)?;
                stream.shutdown(Shutdown::Write).map_err(io_err)?;
                let mut response = Vec::new();
                stream.read_to_end(&mut response).map_err(io_err)?;
                Ok(response)
            }
            #[cfg(not(unix))]
            LivestatusAddress::Unix(_) => Err(io_err(std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "unix sockets are not available on this platform",
            ))),
        }
    }
}

impl MonitoringClient for LivestatusClient {
    fn query(&self, table: &str, columns: &[String], filters: &[String]) -> Result<Vec<Row>, TransportError> {
        let request = encode_request(table, columns, filters);
        debug!(endpoint = %self.address.describe(), %request, "livestatus query");
        let response = self.exchange(&request)?;
        decode_response(columns, &response)
    }
}

fn connect_tcp(addr: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for sock_addr in addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&sock_addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address resolved for {addr}"))
    }))
}

pub fn encode_request(table: &str, columns: &[String], filters: &[String]) -> String {
    let mut request = format!("GET {table}\n");
    if !columns.is_empty() {
        request.push_str(&format!("Columns: {}\n", columns.join(" ")));
    }
    for filter in filters {
        request.push_str(&format!("Filter: {filter}\n"));
    }
    request.push_str("OutputFormat: json\n");
    request.push_str("ResponseHeader: fixed16\n\n");
    request
}

pub fn decode_response(columns: &[String], response: &[u8]) -> Result<Vec<Row>, TransportError> {
    let decode_err = |reason: String| TransportError::Decode {
        service: SERVICE,
        reason,
    };

    if response.len() < HEADER_LEN {
        return Err(decode_err(format!("short response ({} bytes)", response.len())));
    }
    let header = std::str::from_utf8(&response[..HEADER_LEN])
        .map_err(|e| decode_err(format!("header is not UTF-8: {e}")))?;
    let status: u16 = header
        .get(..3)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| decode_err(format!("bad header {header:?}")))?;

    let body = String::from_utf8_lossy(&response[HEADER_LEN..]);
    if status != 200 {
        return Err(TransportError::Status {
            service: SERVICE,
            status,
            body: body.trim().to_string(),
        });
    }

    let table: Vec<Vec<Value>> =
        serde_json::from_str(&body).map_err(|e| decode_err(format!("invalid JSON body: {e}")))?;

    table
        .into_iter()
        .map(|values| -> Result<Row, TransportError> {
            if values.len() != columns.len() {
                return Err(decode_err(format!(
                    "row has {} values for {} columns",
                    values.len(),
                    columns.len()
                )));
            }
            Ok(columns
                .iter()
                .cloned()
                .zip(values.into_iter().map(value_to_string))
                .collect())
        })
        .collect()
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::MonitoringQuery;
    use std::net::TcpListener;
    use std::thread;

    fn columns() -> Vec<String> {
        vec!["host_name".into(), "plugin_output".into(), "host_notes".into()]
    }

    fn framed(status: u16, body: &str) -> Vec<u8> {
        let mut out = format!("{status} {:>11}\n", body.len()).into_bytes();
        out.extend_from_slice(body.as_bytes());
        out
    }

    #[test]
    fn test_encode_request() {
        let request = encode_request(
            "services",
            &columns(),
            &["service_description = security".into(), "state != 0".into()],
        );
        assert_eq!(
            request,
            "GET services\n\
             Columns: host_name plugin_output host_notes\n\
             Filter: service_description = security\n\
             Filter: state != 0\n\
             OutputFormat: json\n\
             ResponseHeader: fixed16\n\n"
        );
    }

    #[test]
    fn test_decode_rows() {
        let body = r#"[["db1","Packages: libssl, curl",""],["web1","Packages: curl",null]]"#;
        let rows = decode_response(&columns(), &framed(200, body)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["host_name"], "db1");
        assert_eq!(rows[0]["plugin_output"], "Packages: libssl, curl");
        assert_eq!(rows[1]["host_notes"], "");
    }

    #[test]
    fn test_decode_numbers_stringified() {
        let cols: Vec<String> = vec!["host_name".into(), "state".into()];
        let rows = decode_response(&cols, &framed(200, r#"[["db1",2]]"#)).unwrap();
        assert_eq!(rows[0]["state"], "2");
    }

    #[test]
    fn test_decode_error_status() {
        let err = decode_response(&columns(), &framed(400, "Invalid header 'Filtre'")).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Status { status: 400, ref body, .. } if body == "Invalid header 'Filtre'"
        ));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(
            decode_response(&columns(), b"200"),
            Err(TransportError::Decode { .. })
        ));
        assert!(matches!(
            decode_response(&columns(), &framed(200, r#"[["db1"]]"#)),
            Err(TransportError::Decode { .. })
        ));
    }

    #[test]
    fn test_address_parse() {
        assert_eq!(
            LivestatusAddress::parse("nagios:6557"),
            LivestatusAddress::Tcp("nagios:6557".into())
        );
        assert_eq!(
            LivestatusAddress::parse("/var/lib/nagios/rw/live"),
            LivestatusAddress::Unix("/var/lib/nagios/rw/live".into())
        );
        assert_eq!(
            LivestatusAddress::parse("unix:/tmp/live"),
            LivestatusAddress::Unix("/tmp/live".into())
        );
    }

    #[test]
    fn test_query_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = String::new();
            stream.read_to_string(&mut request).unwrap();
            stream
                .write_all(&framed(200, r#"[["db1","Packages: libssl, curl","mantis_project_id: 3"]]"#))
                .unwrap();
            request
        });

        let client = LivestatusClient::new(
            LivestatusAddress::Tcp(addr.to_string()),
            Duration::from_secs(5),
        );
        let rows = MonitoringQuery::new("services")
            .columns(columns())
            .filter("service_description = security")
            .filter("state != 0")
            .execute(&client)
            .unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("GET services\nColumns: host_name plugin_output host_notes\n"));
        assert!(request.contains("Filter: state != 0\n"));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["host_notes"], "mantis_project_id: 3");
    }

    #[test]
    fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = LivestatusClient::new(LivestatusAddress::Tcp(addr.to_string()), Duration::from_secs(1));
        let err = client.query("services", &columns(), &[]).unwrap_err();
        assert!(matches!(err, TransportError::Io { .. }));
    }
}
