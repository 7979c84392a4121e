use super::error::RequestError;
use crate::connection::RtmpConnType;
use url::Url;

/// Identification of one client connection, filled in over the course of
/// `connect` and `publish`/`play`.
#[derive(Debug)]
pub struct Request {
    // tcUrl: rtmp://a.com/live?key=1
    pub tc_url: Url,
    pub app: String,
    pub stream: Option<String>,
    pub conn_type: RtmpConnType,
    pub object_encoding: f64,
    // From amf::play
    pub duration: u32,
}

impl Request {
    pub fn parse_from(url: String) -> Result<Self, RequestError> {
        let tc_url = Url::parse(&url)?;

        let app;
        let mut stream = None;
        {
            let app_stream: Vec<&str> = tc_url.path().splitn(3, '/').collect();
            if app_stream.len() < 2 || app_stream[1].is_empty() {
                return Err(RequestError::NotfoundApp);
            }
            app = app_stream[1].to_string();
            if app_stream.len() > 2 && !app_stream[2].is_empty() {
                stream = Some(app_stream[2].to_string());
            }
        }

        Ok(Request {
            tc_url,
            app,
            stream,
            conn_type: RtmpConnType::Unknow,
            object_encoding: super::types::rtmp_sig::RTMP_SIG_AMF0_VER,
            duration: 0,
        })
    }

    pub fn stream(&self) -> &str {
        match &self.stream {
            Some(s) => s,
            None => "",
        }
    }

    pub fn vhost(&self) -> String {
        vhost_of(&self.tc_url)
    }

    pub fn stream_key(&self) -> String {
        format!("{}/{}/{}", self.vhost(), self.app, self.stream())
    }
}

/// Resolves the virtual host a connection belongs to. Currently a stub;
/// swap the body to derive the vhost from the tcUrl host or query.
pub fn vhost_of(_tc_url: &Url) -> String {
    "127.0.0.1".to_string()
}
