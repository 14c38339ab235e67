//! Tests for share resolution against mocked share pages.

use std::time::Duration;

use lanzou_drive::error::{DriveError, ErrorKind};
use lanzou_drive::http::RetryPolicy;
use lanzou_drive::models::{EntryKind, EXTRA_SHARE_PWD, EXTRA_TYPE};
use lanzou_drive::{
    AuthMode, DriverConfig, LanzouDriver, Session, SessionOptions, ShareContent, ShareResolver,
    ShareTarget,
};
use mockito::{Matcher, Server, ServerGuard};
use tokio_util::sync::CancellationToken;

const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6";

fn session(server: &ServerGuard) -> Session {
    let config = DriverConfig {
        mode: AuthMode::Url,
        share_password: "pass".to_string(),
        base_url: server.url(),
        share_url: server.url(),
        ..Default::default()
    };
    let options = SessionOptions::default()
        .with_retry(RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5)))
        .with_page_delay(Duration::from_millis(1));
    Session::resume(config, options, None).unwrap()
}

fn form(pairs: &[(&str, &str)]) -> Matcher {
    Matcher::AllOf(
        pairs
            .iter()
            .map(|(k, v)| Matcher::UrlEncoded(k.to_string(), v.to_string()))
            .collect(),
    )
}

const FOLDER_PAGE: &str = r#"<html><head><title>资料 - 蓝奏云</title></head><body>
<div id="folder"><div class="mbxfolder"><a href="/b0sub1">子目录</a></div></div>
<div id="infos"></div>
<script type="text/javascript">
var pgs;
var ib = 'TOKEN';
var ia = 'KSIGN';
pgs = 1;
$.ajax({ type : 'post', url : '/filemoreajax.php', data : { 'lx':2, 'fid':1234, 'uid':'99', 'pg':pgs, 'rep':'0', 't':ib, 'k':ia, 'up':1, 'ls':1, 'pwd':pwd }, dataType : 'json' });
</script></body></html>"#;

const PASSWORD_PAGE: &str = r#"<html><head><title>report.pdf - 蓝奏云</title></head><body>
<div class="fileinfo">文件大小：3.5 M<br>上传时间：2024-01-02</div>
<div id="pwdload"><input type="text" id="pwd" placeholder="输入密码"></div>
<script type="text/javascript">
/* old handler
function down_p(){ $.ajax({ url : '/ajaxm.php?file=1', data : { 'sign':'STALE' } }); }
*/
function down_p(){
var pwd = document.getElementById('pwd').value;
$.ajax({ type : 'post', url : '/ajaxm.php?file=456', data : { 'action':'downprocess','sign':'SIGNPW','p':pwd,'kd':1 }, dataType : 'json' });
}
</script></body></html>"#;

const CONFIRM_PAGE: &str = r#"<html><script type="text/javascript">
var cppat = 'C1';
$.ajax({ type : 'post', url : '/ajax.php', data : { 'file':'?pw=1','sign':cppat,'ves':1 }, dataType : 'json' });
</script></html>"#;

mod folder {
    use super::*;

    #[tokio::test]
    async fn lists_sub_folders_then_paged_rows() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/b0folder")
            .with_body(FOLDER_PAGE)
            .create_async()
            .await;
        let page1 = server
            .mock("POST", "/filemoreajax.php")
            .match_body(form(&[
                ("pg", "1"),
                ("pwd", "pass"),
                ("t", "TOKEN"),
                ("k", "KSIGN"),
                ("fid", "1234"),
            ]))
            .with_body(
                r#"{"zt":1,"info":"sucess","text":[{"id":"iaaa","name_all":"a.txt","size":"1.0 K","time":"2024-01-02"},{"id":"ibbb","name_all":"b.txt","size":"2.0 K","time":"昨天"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let page2 = server
            .mock("POST", "/filemoreajax.php")
            .match_body(form(&[("pg", "2")]))
            .with_body(r#"{"zt":1,"info":"sucess","text":[{"id":"iccc","name_all":"c.txt","size":"3 K","time":"3 天前"}]}"#)
            .expect(1)
            .create_async()
            .await;
        let page3 = server
            .mock("POST", "/filemoreajax.php")
            .match_body(form(&[("pg", "3")]))
            .with_body(r#"{"zt":2,"info":"没有了","text":0}"#)
            .expect(1)
            .create_async()
            .await;
        let page4 = server
            .mock("POST", "/filemoreajax.php")
            .match_body(form(&[("pg", "4")]))
            .expect(0)
            .create_async()
            .await;

        let session = session(&server);
        let target = ShareTarget::new("b0folder", Some("pass".to_string()));
        let content = ShareResolver::new(&session)
            .resolve(&target, &CancellationToken::new())
            .await
            .unwrap();

        let ShareContent::Folder(entries) = content else {
            panic!("expected a folder listing");
        };
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b0sub1", "iaaa", "ibbb", "iccc"]);

        assert_eq!(entries[0].kind, EntryKind::Folder);
        assert_eq!(entries[0].name, "子目录");
        assert_eq!(entries[0].password, None);
        assert_eq!(entries[1].password.as_deref(), Some("pass"));
        assert_eq!(entries[1].share_id.as_deref(), Some("iaaa"));
        assert_eq!(entries[2].size, Some(2048));

        page1.assert_async().await;
        page2.assert_async().await;
        page3.assert_async().await;
        page4.assert_async().await;
    }

    #[tokio::test]
    async fn folder_page_without_parameters_fails() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/b0empty")
            .with_body("<html><div id=\"infos\">no script</div></html>")
            .create_async()
            .await;

        let session = session(&server);
        let err = ShareResolver::new(&session)
            .resolve(&ShareTarget::new("b0empty", None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailure);
    }

    #[tokio::test]
    async fn url_mode_driver_lists_a_share() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/b0folder")
            .with_body(FOLDER_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", "/filemoreajax.php")
            .match_body(form(&[("pg", "1")]))
            .with_body(r#"{"zt":1,"text":[{"id":"iaaa","name_all":"a.txt","size":"1.0 K","time":"2024-01-02"}]}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/filemoreajax.php")
            .match_body(form(&[("pg", "2")]))
            .with_body(r#"{"zt":2,"info":"没有了","text":0}"#)
            .create_async()
            .await;

        let driver = LanzouDriver::from_session(session(&server));
        let objects = driver
            .list(&driver.folder_ref("b0folder"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(objects.len(), 2);
        assert!(objects[0].is_folder);
        assert_eq!(objects[1].name, "a.txt");
        assert_eq!(objects[1].extra_value(EXTRA_TYPE), Some("1"));
        assert_eq!(objects[1].extra_value(EXTRA_SHARE_PWD), Some("pass"));
    }
}

mod file {
    use super::*;

    #[tokio::test]
    async fn password_file_goes_through_confirmation_page() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ipw")
            .with_body(PASSWORD_PAGE)
            .create_async()
            .await;
        let ajaxm = server
            .mock("POST", "/ajaxm.php")
            .match_query(Matcher::UrlEncoded("file".to_string(), "456".to_string()))
            .match_body(form(&[
                ("action", "downprocess"),
                ("sign", "SIGNPW"),
                ("p", "secret"),
            ]))
            .with_body(format!(
                r#"{{"zt":1,"dom":"{}","url":"?pw=1","inf":"report.pdf"}}"#,
                server.url()
            ))
            .expect(1)
            .create_async()
            .await;
        let staged = server
            .mock("GET", "/file/")
            .match_query(Matcher::UrlEncoded("pw".to_string(), "1".to_string()))
            .match_header("accept-language", ACCEPT_LANGUAGE)
            .match_header("cookie", Matcher::Regex("down_ip=1".to_string()))
            .with_body(CONFIRM_PAGE)
            .expect(1)
            .create_async()
            .await;
        let confirm = server
            .mock("POST", "/ajax.php")
            .match_header("cookie", Matcher::Regex("down_ip=1".to_string()))
            .match_body(form(&[("el", "2"), ("sign", "C1"), ("file", "?pw=1")]))
            .with_body(r#"{"zt":1,"info":"sucess","url":"https://cdn.example.com/report.pdf?e=1700000000"}"#)
            .expect(1)
            .create_async()
            .await;

        let session = session(&server);
        let target = ShareTarget::new("ipw", Some("secret".to_string()));
        let content = ShareResolver::new(&session)
            .resolve(&target, &CancellationToken::new())
            .await
            .unwrap();

        let ShareContent::File(file) = content else {
            panic!("expected a single file");
        };
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.url, "https://cdn.example.com/report.pdf?e=1700000000");
        assert_eq!(file.expires_at.map(|t| t.timestamp()), Some(1_700_000_000));
        assert_eq!(file.size(), Some(3_670_016));
        assert_eq!(file.time_text, "2024-01-02");
        assert_eq!(file.password.as_deref(), Some("secret"));

        ajaxm.assert_async().await;
        staged.assert_async().await;
        confirm.assert_async().await;
    }

    #[tokio::test]
    async fn missing_staged_url_is_an_error() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ipw")
            .with_body(PASSWORD_PAGE)
            .create_async()
            .await;
        server
            .mock("POST", "/ajaxm.php")
            .match_query(Matcher::Any)
            .with_body(r#"{"zt":1,"dom":"","url":"","inf":0}"#)
            .create_async()
            .await;

        let session = session(&server);
        let err = ShareResolver::new(&session)
            .resolve_file(&ShareTarget::new("ipw", None), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::MissingDownloadUrl));
    }

    #[tokio::test]
    async fn rejected_download_reports_status_and_snippet() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/file/")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body("<html>denied</html>")
            .create_async()
            .await;

        let session = session(&server);
        let err = ShareResolver::new(&session)
            .resolve_download_redirect(
                &format!("{}/file/?x=1", server.url()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        match err {
            DriveError::DownloadRejected { status, len, snippet } => {
                assert_eq!(status, 403);
                assert_eq!(len, 19);
                assert_eq!(snippet, "<html>denied</html>");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

mod pages {
    use super::*;

    async fn resolve_page(body: &str) -> DriveError {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/ishare")
            .with_body(body)
            .create_async()
            .await;

        let session = session(&server);
        ShareResolver::new(&session)
            .resolve(&ShareTarget::new("ishare", None), &CancellationToken::new())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn cancelled_share() {
        let err = resolve_page("<div class=\"off\"><div class=\"off0\">来晚啦...文件取消分享了</div></div>").await;
        assert!(matches!(err, DriveError::ShareCancelled));
    }

    #[tokio::test]
    async fn missing_file() {
        let err = resolve_page("<div class=\"off\">文件不存在，或已删除</div>").await;
        assert!(matches!(err, DriveError::FileNotExist));
    }

    #[tokio::test]
    async fn empty_page_means_blocked() {
        let err = resolve_page("").await;
        assert!(matches!(err, DriveError::Blocked));
    }
}
