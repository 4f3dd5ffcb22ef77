use crate::collab::PageContext;
use crate::target::PreviewTarget;

/// Moderation actions offered on an open preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationKind {
    Notice,
    Promote,
    Block,
    Delete,
}

/// Moderation panel shown next to the overlay for viewers who can moderate. Holds what
/// the next pin/promote press will request; the flags flip only when the server accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPanel {
    target_key: String,
    set_as_notice: bool,
    set_as_promoted: bool,
    pub shortcuts: bool,
}

impl AdminPanel {
    /// Attaches only when the setting is on and the host page shows moderation controls.
    pub fn attach(
        page: &dyn PageContext,
        enabled: bool,
        shortcuts: bool,
        target: &PreviewTarget,
    ) -> Option<Self> {
        if !enabled || !page.viewer_can_moderate() {
            return None;
        }
        Some(Self {
            target_key: target.cache_key(),
            set_as_notice: !target.is_notice,
            set_as_promoted: !target.is_promoted,
            shortcuts,
        })
    }

    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    /// Value the next pin press sends.
    pub fn next_notice(&self) -> bool {
        self.set_as_notice
    }

    pub fn next_promoted(&self) -> bool {
        self.set_as_promoted
    }

    pub fn notice_label(&self) -> &'static str {
        if self.set_as_notice {
            "공지로 등록"
        } else {
            "공지 등록 해제"
        }
    }

    pub fn promote_label(&self) -> &'static str {
        if self.set_as_promoted {
            "개념글 등록"
        } else {
            "개념글 해제"
        }
    }

    pub fn block_label(&self) -> &'static str {
        "차단"
    }

    pub fn delete_label(&self) -> &'static str {
        "삭제 (D)"
    }

    /// Flips the toggle after the server accepted `kind`.
    pub fn accepted(&mut self, kind: ModerationKind) {
        match kind {
            ModerationKind::Notice => self.set_as_notice = !self.set_as_notice,
            ModerationKind::Promote => self.set_as_promoted = !self.set_as_promoted,
            ModerationKind::Block | ModerationKind::Delete => {}
        }
    }
}
