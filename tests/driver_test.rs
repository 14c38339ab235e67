//! Tests for the driver facade against a mocked drive.

use std::time::Duration;

use lanzou_drive::error::{DriveError, ErrorKind};
use lanzou_drive::http::RetryPolicy;
use lanzou_drive::models::{EXTRA_REPAIRED, EXTRA_SHARE_ID, EXTRA_SHARE_PWD, EXTRA_TYPE};
use lanzou_drive::{
    AuthMode, DriverConfig, LanzouDriver, LinkResource, Session, SessionOptions, Tokens,
};
use mockito::{Matcher, Server, ServerGuard};
use tokio_util::sync::CancellationToken;

fn driver(server: &ServerGuard, mode: AuthMode) -> LanzouDriver {
    let config = DriverConfig {
        mode,
        cookie: "ylogin=1001; phpdisk_info=abc".to_string(),
        base_url: server.url(),
        share_url: server.url(),
        ..Default::default()
    };
    let options = SessionOptions::default()
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)))
        .with_page_delay(Duration::from_millis(1));
    let tokens = mode.is_owner().then(|| Tokens {
        uid: "1001".to_string(),
        vei: "VEI".to_string(),
    });
    LanzouDriver::from_session(Session::resume(config, options, tokens).unwrap())
}

fn task(id: &str) -> Matcher {
    Matcher::UrlEncoded("task".to_string(), id.to_string())
}

fn task_with(id: &str, pairs: &[(&str, &str)]) -> Matcher {
    let mut matchers = vec![task(id)];
    matchers.extend(
        pairs
            .iter()
            .map(|(k, v)| Matcher::UrlEncoded(k.to_string(), v.to_string())),
    );
    Matcher::AllOf(matchers)
}

fn tokens_query() -> Matcher {
    Matcher::AllOf(vec![
        Matcher::UrlEncoded("uid".to_string(), "1001".to_string()),
        Matcher::UrlEncoded("vei".to_string(), "VEI".to_string()),
    ])
}

mod listing {
    use super::*;

    #[tokio::test]
    async fn files_are_paged_until_first_empty_page() {
        let mut server = Server::new_async().await;
        let folders = server
            .mock("POST", "/doupload.php")
            .match_query(tokens_query())
            .match_body(task_with("47", &[("folder_id", "-1")]))
            .with_body(r#"{"zt":1,"info":"","text":[{"fol_id":"7","name":"docs"}]}"#)
            .expect(1)
            .create_async()
            .await;
        let page1 = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("5", &[("folder_id", "-1"), ("pg", "1")]))
            .with_body(
                r#"{"zt":1,"info":1,"text":[{"id":"11","name_all":"a.zip","size":"1.5 M","time":"2024-01-02"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("5", &[("pg", "2")]))
            .with_body(r#"{"zt":1,"info":1,"text":[{"id":"12","name_all":"b.txt","size":"20 K","time":"昨天"}]}"#)
            .expect(1)
            .create_async()
            .await;
        let page3 = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("5", &[("pg", "3")]))
            .with_body(r#"{"zt":1,"info":0,"text":0}"#)
            .expect(1)
            .create_async()
            .await;
        let page4 = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("5", &[("pg", "4")]))
            .expect(0)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let entries = driver
            .list(&driver.root(), &CancellationToken::new())
            .await
            .unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["docs", "a.zip", "b.txt"]);
        assert!(entries[0].is_folder);
        assert_eq!(entries[0].id, "7");
        assert_eq!(entries[1].size, 1_572_864);
        assert_eq!(entries[1].extra_value(EXTRA_TYPE), Some("0"));

        folders.assert_async().await;
        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
        page4.assert_async().await;
    }

    #[tokio::test]
    async fn api_error_carries_server_message() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .with_body(r#"{"zt":0,"info":"文件夹不存在"}"#)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let err = driver
            .list(&driver.folder_ref("42"), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, DriveError::ApiError(ref message) if message == "文件夹不存在"));
        assert_eq!(err.kind(), ErrorKind::RemoteRejected);
    }
}

mod manage {
    use super::*;

    #[tokio::test]
    async fn make_dir_returns_new_folder() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/doupload.php")
            .match_query(tokens_query())
            .match_body(task_with(
                "2",
                &[("parent_id", "-1"), ("folder_name", "photos"), ("folder_description", "")],
            ))
            .with_body(r#"{"zt":1,"info":"创建成功","text":"5566"}"#)
            .expect(1)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let folder = driver
            .make_dir(&driver.root(), "photos", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(folder.id, "5566");
        assert_eq!(folder.name, "photos");
        assert!(folder.is_folder);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rename_move_and_remove_send_their_tasks() {
        let mut server = Server::new_async().await;
        let rename = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("46", &[("file_id", "11"), ("file_name", "c.zip"), ("type", "2")]))
            .with_body(r#"{"zt":1,"info":"修改成功"}"#)
            .expect(1)
            .create_async()
            .await;
        let moved = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("20", &[("folder_id", "7"), ("file_id", "11")]))
            .with_body(r#"{"zt":1,"info":"移动成功"}"#)
            .expect(1)
            .create_async()
            .await;
        let remove_file = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("6", &[("file_id", "11")]))
            .with_body(r#"{"zt":1,"info":"已删除"}"#)
            .expect(1)
            .create_async()
            .await;
        let remove_folder = server
            .mock("POST", "/doupload.php")
            .match_query(Matcher::Any)
            .match_body(task_with("3", &[("folder_id", "7")]))
            .with_body(r#"{"zt":1,"info":"删除成功"}"#)
            .expect(1)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let cancel = CancellationToken::new();
        let file = driver.file_ref("11");
        let folder = driver.folder_ref("7");

        let renamed = driver.rename_file(&file, "c.zip", &cancel).await.unwrap();
        assert_eq!(renamed.name, "c.zip");
        driver.move_file(&renamed, &folder, &cancel).await.unwrap();
        driver.remove(&renamed, &cancel).await.unwrap();
        driver.remove(&folder, &cancel).await.unwrap();

        rename.assert_async().await;
        moved.assert_async().await;
        remove_file.assert_async().await;
        remove_folder.assert_async().await;
    }

    #[tokio::test]
    async fn folders_cannot_be_moved_or_renamed() {
        let server = Server::new_async().await;
        let driver = driver(&server, AuthMode::Cookie);
        let cancel = CancellationToken::new();
        let folder = driver.folder_ref("7");

        let err = driver
            .move_file(&folder, &driver.root(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let err = driver.rename_file(&folder, "x", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[tokio::test]
    async fn put_uploads_multipart_form() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/html5up.php")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("WU_FILE_0".to_string()),
                Matcher::Regex(r#"name="upload_file"; filename="hello.txt""#.to_string()),
                Matcher::Regex("hello world".to_string()),
            ]))
            .with_body(
                r#"{"zt":1,"info":"上传成功","text":[{"id":"999","name_all":"hello.txt","size":"1.0 K","time":"0 秒前"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let uploaded = driver
            .put(
                &driver.root(),
                "hello.txt",
                b"hello world".to_vec(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(uploaded.id, "999");
        assert_eq!(uploaded.name, "hello.txt");
        assert!(!uploaded.is_folder);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn owner_operations_are_unsupported_in_url_mode() {
        let mut server = Server::new_async().await;
        let any = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Url);
        let cancel = CancellationToken::new();
        let root = driver.root();

        let err = driver.make_dir(&root, "x", &cancel).await.unwrap_err();
        assert!(matches!(err, DriveError::Unsupported(_)));
        let err = driver
            .put(&root, "a.txt", Vec::new(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::Unsupported(_)));
        let err = driver.remove(&root, &cancel).await.unwrap_err();
        assert!(matches!(err, DriveError::Unsupported(_)));
        any.assert_async().await;
    }
}

mod link {
    use super::*;

    const SHARE_PAGE: &str = r#"<html><head><title>a.zip - 蓝奏云</title></head>
<body><div class="fileinfo">文件大小：<span>2.0 M</span></div>
<div class="d2"><iframe class="ifr2" name="1" src="/fn?QUJDREVG" frameborder="0" scrolling="no"></iframe></div>
</body></html>"#;

    const DOWNLOAD_FRAME: &str = r#"<html><script type="text/javascript">
var ajaxdata = '?ctdf';
var wp_sign = 'SIGN123';
$.ajax({ type : 'post', url : '/ajaxm.php?file=123', data : { 'action':'downprocess','signs':ajaxdata,'sign':wp_sign,'websign':'','ves':1 }, dataType : 'json' });
</script></html>"#;

    #[tokio::test]
    async fn owned_file_resolves_through_its_share() {
        let mut server = Server::new_async().await;
        let share_info = server
            .mock("POST", "/doupload.php")
            .match_query(tokens_query())
            .match_body(task_with("22", &[("file_id", "11")]))
            .with_body(format!(
                r#"{{"zt":1,"info":{{"pwd":"","onof":"0","f_id":"iabc","is_newd":"{}"}},"text":null}}"#,
                server.url()
            ))
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/iabc")
            .with_body(SHARE_PAGE)
            .create_async()
            .await;
        server
            .mock("GET", "/fn")
            .match_query(Matcher::Any)
            .with_body(DOWNLOAD_FRAME)
            .create_async()
            .await;
        let ajaxm = server
            .mock("POST", "/ajaxm.php")
            .match_query(Matcher::UrlEncoded("file".to_string(), "123".to_string()))
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("action".to_string(), "downprocess".to_string()),
                Matcher::UrlEncoded("signs".to_string(), "?ctdf".to_string()),
                Matcher::UrlEncoded("sign".to_string(), "SIGN123".to_string()),
            ]))
            .with_body(format!(
                r#"{{"zt":1,"dom":"{}","url":"?dl=1","inf":0}}"#,
                server.url()
            ))
            .expect(1)
            .create_async()
            .await;
        let direct = format!("{}/real/a.zip?e=1700000000", server.url());
        server
            .mock("GET", "/file/")
            .match_query(Matcher::UrlEncoded("dl".to_string(), "1".to_string()))
            .match_header("cookie", Matcher::Regex("down_ip=1".to_string()))
            .with_status(302)
            .with_header("location", &direct)
            .create_async()
            .await;
        let probe = server
            .mock("HEAD", "/real/a.zip")
            .match_query(Matcher::Any)
            .with_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
            .expect(1)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let (link, updated) = driver
            .link(&driver.file_ref("11"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(link.url, direct);
        assert_eq!(link.expiration.map(|t| t.timestamp()), Some(1_700_000_000));
        assert!(link.headers.iter().any(|(name, _)| name == "User-Agent"));

        assert_eq!(updated.name, "a.zip");
        assert_eq!(updated.extra_value(EXTRA_SHARE_ID), Some("iabc"));
        assert_eq!(updated.extra_value(EXTRA_SHARE_PWD), Some(""));
        assert!(updated.extra.contains_key(EXTRA_REPAIRED));
        assert_eq!(updated.modified.map(|t| t.timestamp()), Some(1_445_412_480));

        share_info.assert_async().await;
        ajaxm.assert_async().await;
        probe.assert_async().await;
    }

    #[tokio::test]
    async fn download_streams_link_to_file() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/real/a.zip")
            .match_header("user-agent", "test-agent/1.0")
            .with_body("zip bytes here")
            .expect(1)
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let link = LinkResource {
            url: format!("{}/real/a.zip", server.url()),
            headers: vec![("User-Agent".to_string(), "test-agent/1.0".to_string())],
            expiration: None,
        };
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("a.zip");

        let written = driver
            .download(&link, &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(written, 14);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "zip bytes here");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn download_rejects_error_status() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/gone.zip")
            .with_status(404)
            .with_body("not here")
            .create_async()
            .await;

        let driver = driver(&server, AuthMode::Cookie);
        let link = LinkResource {
            url: format!("{}/gone.zip", server.url()),
            headers: Vec::new(),
            expiration: None,
        };
        let dir = tempfile::tempdir().unwrap();

        let err = driver
            .download(&link, dir.path().join("gone.zip"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::DownloadRejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn object_without_source_is_rejected() {
        let server = Server::new_async().await;
        let driver = driver(&server, AuthMode::Cookie);
        let mut file = driver.file_ref("11");
        file.extra.clear();

        let err = driver
            .link(&file, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::ParseError(ref message) if message == "file information lost"));
    }
}
