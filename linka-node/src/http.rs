use embassy_net::dns::DnsSocket;
use embassy_net::tcp::client::{TcpClient, TcpClientState};
use linka_shared::platform::{API_KEY_HEADER, CONTENT_TYPE};
use linka_shared::{Request, Transport};
use reqwless::client::HttpClient;
use reqwless::request::{Method, RequestBuilder};

use crate::{NetStack, WifiStaDriver};

pub const TCP_BUFFER_LEN: usize = 1024;
const RESPONSE_BUFFER_LEN: usize = 1024;

pub type TcpState = TcpClientState<1, TCP_BUFFER_LEN, TCP_BUFFER_LEN>;

/// Plain `http://` client on top of the embassy-net stack, one connection per request.
pub struct HttpTransport {
    tcp: TcpClient<'static, WifiStaDriver, 1, TCP_BUFFER_LEN, TCP_BUFFER_LEN>,
    dns: DnsSocket<'static, WifiStaDriver>,
    response: [u8; RESPONSE_BUFFER_LEN],
}

impl HttpTransport {
    pub fn new(stack: &'static NetStack, state: &'static TcpState) -> Self {
        Self {
            tcp: TcpClient::new(stack, state),
            dns: DnsSocket::new(stack),
            response: [0; RESPONSE_BUFFER_LEN],
        }
    }
}

impl Transport for HttpTransport {
    type Error = reqwless::Error;

    async fn post(&mut self, request: &Request<'_>) -> Result<u16, Self::Error> {
        let headers = [
            ("Content-Type", CONTENT_TYPE),
            (API_KEY_HEADER, request.api_key),
        ];

        let mut client = HttpClient::new(&self.tcp, &self.dns);
        let mut handle = client
            .request(Method::POST, request.url)
            .await?
            .headers(&headers)
            .body(request.body);
        let response = handle.send(&mut self.response).await?;

        Ok(response.status as u16)
    }
}
