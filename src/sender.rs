use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::bridge::{DeviceBridge, KEYCODE_DEL};
use crate::uidump::UiTree;

/// Characters the device shell would interpret inside `input text`.
const SHELL_SPECIAL: &[char] = &['\'', '"', '\\', '`', '$', '&', '|', ';', '<', '>'];

/// Reduce `message` to something `input text` can type: ASCII only, no shell
/// metacharacters, single-spaced on one line. `None` if nothing is left.
pub fn sanitize_message(message: &str) -> Option<String> {
    let kept: String = message
        .chars()
        .filter(|c| c.is_ascii() && !SHELL_SPECIAL.contains(c))
        .collect();
    let collapsed = kept.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Types and sends a message in the reply dialog opened by tapping a target.
pub struct Sender {
    bridge: Arc<dyn DeviceBridge>,
    settle: Duration,
    cancel_fallback: bool,
}

impl Sender {
    pub fn new(bridge: Arc<dyn DeviceBridge>, settle: Duration, cancel_fallback: bool) -> Self {
        Self {
            bridge,
            settle,
            cancel_fallback,
        }
    }

    /// Send `message`. On failure the dialog is dismissed via its Cancel
    /// button when the fallback is enabled, and the error is returned.
    pub async fn send(&self, message: &str) -> Result<()> {
        match self.try_send(message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!("sending failed: {e:#}");
                if self.cancel_fallback && !self.tap_cancel().await {
                    tracing::warn!("could not dismiss the reply dialog");
                }
                Err(e)
            }
        }
    }

    async fn dump(&self) -> Result<UiTree> {
        let xml = self
            .bridge
            .dump_tree()
            .await
            .context("failed to dump reply dialog")?;
        Ok(UiTree::parse(&xml)?)
    }

    async fn try_send(&self, message: &str) -> Result<()> {
        let text = sanitize_message(message).context("message is empty after sanitization")?;

        let input = self
            .dump()
            .await?
            .input_field()
            .map(|e| e.center())
            .context("input field not found in reply dialog")?;
        tracing::info!("tapping input field at {input}");
        self.bridge.tap(input.x, input.y).await?;
        tokio::time::sleep(self.settle).await;

        self.bridge.key_event(KEYCODE_DEL).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.bridge.input_text(&text).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let send = self
            .dump()
            .await?
            .send_button()
            .map(|e| e.center())
            .context("send button not found in reply dialog")?;
        tracing::info!("tapping send button at {send}");
        self.bridge.tap(send.x, send.y).await?;
        tokio::time::sleep(self.settle).await;

        tracing::info!("message sent: {text:?}");
        Ok(())
    }

    /// Tap the dialog's Cancel button. Returns whether one was tapped.
    pub async fn tap_cancel(&self) -> bool {
        let cancel = match self.dump().await {
            Ok(tree) => tree.cancel_button().map(|e| e.center()),
            Err(e) => {
                tracing::warn!("cannot look for Cancel: {e:#}");
                return false;
            }
        };
        let Some(point) = cancel else {
            return false;
        };

        tracing::info!("tapping Cancel at {point}");
        match self.bridge.tap(point.x, point.y).await {
            Ok(()) => {
                tokio::time::sleep(self.settle).await;
                true
            }
            Err(e) => {
                tracing::warn!("failed to tap Cancel: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BridgeCall, FakeBridge};
    use crate::uidump::tests::REPLY_DIALOG_DUMP;

    /// Reply dialog without a send button, as seen when the like quota is used up.
    const NO_SEND_DUMP: &str = r#"<hierarchy rotation="0">
  <node index="0" text="" class="android.widget.FrameLayout" content-desc="" clickable="false" focusable="false" focused="false" bounds="[0,0][1080,2400]">
    <node index="0" text="" class="android.widget.EditText" content-desc="" clickable="true" focusable="true" focused="false" bounds="[60,1700][1020,1820]" />
    <node index="1" text="" class="android.widget.Button" content-desc="" clickable="true" focusable="true" focused="false" bounds="[60,1900][500,2020]">
      <node index="0" text="Cancel" class="android.widget.TextView" content-desc="" clickable="false" focusable="false" focused="false" bounds="[100,1920][460,2000]" />
    </node>
  </node>
</hierarchy>"#;

    fn sender(bridge: Arc<FakeBridge>, cancel_fallback: bool) -> Sender {
        Sender::new(bridge, Duration::ZERO, cancel_fallback)
    }

    #[test]
    fn test_sanitize_message() {
        assert_eq!(
            sanitize_message("Hey \u{201c}you\u{201d}! It's $5 & more;\nok  ").as_deref(),
            Some("Hey you! Its 5 more ok")
        );
        assert_eq!(sanitize_message("a|b<c>d`e\\f").as_deref(), Some("abcdef"));
        assert_eq!(sanitize_message("\u{1f600} ;;"), None);
    }

    #[tokio::test]
    async fn test_send_taps_input_types_and_sends() {
        let bridge = Arc::new(FakeBridge::with_dumps([REPLY_DIALOG_DUMP]));
        sender(bridge.clone(), true).send("Coffee, then crosswords?").await.unwrap();

        assert_eq!(
            bridge.calls(),
            vec![
                BridgeCall::Tap(540, 1760),
                BridgeCall::Key(KEYCODE_DEL),
                BridgeCall::Text("Coffee, then crosswords?".into()),
                BridgeCall::Tap(790, 1960),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_send_button_cancels() {
        let bridge = Arc::new(FakeBridge::with_dumps([REPLY_DIALOG_DUMP, NO_SEND_DUMP]));

        let err = sender(bridge.clone(), true).send("hi").await.unwrap_err();
        assert!(format!("{err:#}").contains("send button not found"));
        assert_eq!(bridge.calls().last(), Some(&BridgeCall::Tap(280, 1960)));
    }

    #[tokio::test]
    async fn test_no_fallback_leaves_dialog() {
        let bridge = Arc::new(FakeBridge::with_dumps([NO_SEND_DUMP]));
        assert!(sender(bridge.clone(), false).send("hi").await.is_err());
        // Input tap, DEL, text; no Cancel tap.
        assert_eq!(bridge.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_message_never_touches_device() {
        let bridge = Arc::new(FakeBridge::with_dumps([REPLY_DIALOG_DUMP]));
        assert!(sender(bridge.clone(), false).send("\u{2764}\u{fe0f}").await.is_err());
        assert!(bridge.calls().is_empty());
    }
}
