//! DeliveryTransport port - 宛先 inbox への 1 リクエスト
//!
//! 署名（HTTP Signatures など）は RequestSigner に任せる。
//! 応答はステータスコードのみ解釈する。

use async_trait::async_trait;

use crate::domain::{DeliveryResponse, Inbox, TransportError};
use crate::ports::directory::LocalActor;

/// One outbound request.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub inbox: Inbox,
    pub body: Vec<u8>,

    /// Extra headers from the signer.
    pub headers: Vec<(String, String)>,
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, request: &DeliveryRequest) -> Result<DeliveryResponse, TransportError>;
}

/// Supplies identity/authentication material for a request.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, actor: &LocalActor, inbox: &Inbox, body: &[u8]) -> Vec<(String, String)>;
}

/// 署名なし。テストと、署名をプロキシ側で行う構成向け。
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsignedRequests;

impl RequestSigner for UnsignedRequests {
    fn sign(&self, _actor: &LocalActor, _inbox: &Inbox, _body: &[u8]) -> Vec<(String, String)> {
        Vec::new()
    }
}
