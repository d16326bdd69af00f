// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for proxy/runtime.rs

#[cfg(test)]
mod tests {
    use super::super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    #[test]
    fn test_command_formats() {
        assert_eq!(
            set_server_addr("prod_svc_web_http", "SRV_1", "10.0.0.1", Some(8080)),
            "set server prod_svc_web_http/SRV_1 addr 10.0.0.1 port 8080"
        );
        assert_eq!(
            set_server_state("prod_svc_web_http", "SRV_2", true),
            "set server prod_svc_web_http/SRV_2 state maint"
        );
        assert_eq!(
            set_ssl_cert("/c/a.pem", b"KEY\nCRT\n"),
            "set ssl cert /c/a.pem <<\nKEY\nCRT\n"
        );
        assert_eq!(
            add_ssl_crt_list("/certs/frontend", "/certs/frontend/a.pem"),
            "add ssl crt-list /certs/frontend /certs/frontend/a.pem"
        );
        assert_eq!(
            set_ssl_ca_file("/certs/ca/ca.pem", b"CA\n\n"),
            "set ssl ca-file /certs/ca/ca.pem <<\nCA\n"
        );
    }

    #[test]
    fn test_check_response() {
        assert!(check_response("set server a/b state ready", String::new()).is_ok());
        let err = check_response("set server a/x state ready", "No such server.\n".to_string())
            .unwrap_err();
        assert!(matches!(err, ProxyError::Runtime { .. }));
        let err = check_response("new ssl cert /c/a.pem", "Certificate '/c/a.pem' already exists!".to_string())
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_socket_runtime_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("runtime.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut received = String::new();
            reader.read_line(&mut received).await.unwrap();
            reader.get_mut().write_all(b"\n").await.unwrap();
            received
        });

        let runtime = SocketRuntime::new(&socket);
        let response = runtime
            .execute("set server b/SRV_1 state ready")
            .await
            .unwrap();
        assert_eq!(response.trim(), "");
        assert_eq!(server.await.unwrap(), "set server b/SRV_1 state ready\n");
    }

    #[tokio::test]
    async fn test_socket_runtime_unreachable() {
        let runtime = SocketRuntime::new("/nonexistent/runtime.sock");
        let err = runtime.execute("show info").await.unwrap_err();
        assert_eq!(err, ProxyError::RuntimeUnavailable);
    }

    #[tokio::test]
    async fn test_recording_runtime_failures() {
        let runtime = RecordingRuntime::new();
        runtime.fail_on("commit ssl cert");
        assert!(runtime.execute("new ssl cert /a.pem").await.is_ok());
        assert!(runtime.execute("commit ssl cert /a.pem").await.is_err());
        assert_eq!(runtime.commands().len(), 2);
    }
}
