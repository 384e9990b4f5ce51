//! Token 估算（压缩触发的廉价代理）
//!
//! 启发式字符计数：英文约 4 字符/token，中文约 1.5 字符/token。
//! 只用作压缩触发判断，不用于计费精度。

use crate::memory::Message;

/// Token 估算器
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算单段文本的 token 数量
    pub fn estimate(text: &str) -> usize {
        let mut ascii_chars = 0;
        let mut non_ascii_chars = 0;

        for c in text.chars() {
            if c.is_ascii() {
                ascii_chars += 1;
            } else {
                non_ascii_chars += 1;
            }
        }

        let tokens = ascii_chars / 4 + (non_ascii_chars as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }

    /// 估算整段对话的 token 开销：正文 + 工具记录的参数与结果
    pub fn estimate_messages(messages: &[Message]) -> usize {
        messages
            .iter()
            .map(|m| {
                let mut total = Self::estimate(m.content_text());
                for record in &m.tool_calls {
                    total += Self::estimate(&record.args.to_string());
                    total += Self::estimate(&record.output_text());
                }
                total
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_english() {
        let text = "Hello, world! This is a test.";
        let tokens = TokenEstimator::estimate(text);
        assert!(tokens > 0);
        assert!(tokens < text.len());
    }

    #[test]
    fn estimate_chinese() {
        let tokens = TokenEstimator::estimate("你好世界，这是一个测试。");
        assert!(tokens > 0);
    }

    #[test]
    fn estimate_counts_tool_records() {
        let mut msg = Message::assistant("ok");
        let base = TokenEstimator::estimate_messages(std::slice::from_ref(&msg));
        msg.tool_calls.push(crate::memory::ToolRecord {
            id: "call_1".into(),
            name: "echo".into(),
            args: serde_json::json!({"text": "some fairly long argument payload"}),
            result: Some("some fairly long result payload".into()),
            error: None,
        });
        assert!(TokenEstimator::estimate_messages(std::slice::from_ref(&msg)) > base);
    }
}
