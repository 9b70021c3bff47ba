//! 命令审批：编排在执行需要批准的命令前询问外部（适配层 / 操作者）
//!
//! ChannelApprovalGate 通过 mpsc 把 PendingApproval 交给适配层，适配层用其中的 oneshot 回复结论；
//! 回复端被丢弃或通道关闭都视为拒绝。

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalVerdict {
    Approved,
    Denied,
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// command 为仍含占位符的形式，不向外暴露密钥
    async fn request_approval(
        &self,
        identity: &str,
        command: &str,
        reasoning: Option<&str>,
    ) -> ApprovalVerdict;
}

/// 等待回复的审批请求
#[derive(Debug)]
pub struct PendingApproval {
    pub identity: String,
    pub command: String,
    pub reasoning: Option<String>,
    pub response_tx: oneshot::Sender<ApprovalVerdict>,
}

impl PendingApproval {
    pub fn respond(self, verdict: ApprovalVerdict) {
        if self.response_tx.send(verdict).is_err() {
            tracing::warn!(identity = %self.identity, "approval requester went away");
        }
    }
}

pub struct ChannelApprovalGate {
    pending_tx: mpsc::Sender<PendingApproval>,
}

impl ChannelApprovalGate {
    /// 返回审批门与适配层消费的接收端
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<PendingApproval>) {
        let (pending_tx, pending_rx) = mpsc::channel(buffer.max(1));
        (Self { pending_tx }, pending_rx)
    }
}

#[async_trait]
impl ApprovalGate for ChannelApprovalGate {
    async fn request_approval(
        &self,
        identity: &str,
        command: &str,
        reasoning: Option<&str>,
    ) -> ApprovalVerdict {
        let (response_tx, response_rx) = oneshot::channel();
        let pending = PendingApproval {
            identity: identity.to_string(),
            command: command.to_string(),
            reasoning: reasoning.map(String::from),
            response_tx,
        };
        if self.pending_tx.send(pending).await.is_err() {
            tracing::warn!(identity = %identity, "approval channel closed, denying command");
            return ApprovalVerdict::Denied;
        }
        response_rx.await.unwrap_or(ApprovalVerdict::Denied)
    }
}
