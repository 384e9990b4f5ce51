//! 流式重建：把交错到达的文本片段与工具生命周期事件合并为有序段列表
//!
//! 每个进行中的轮次持有一个 SegmentAssembler。文本片段追加到当前打开的文本段；
//! 工具事件按（工具名 + 非终态）就地合并，找不到可合并目标时新开工具段并
//! 截断当前文本段。给定相同的有序事件序列，输出与事件间隔无关，完全确定。

use serde_json::Value;

use crate::memory::{Segment, SegmentStatus};

/// 段装配器：一个流式轮次的状态机
#[derive(Debug, Default)]
pub struct SegmentAssembler {
    segments: Vec<Segment>,
    /// 最近打开的文本段是否仍可追加（工具段插入后关闭）
    text_open: bool,
}

impl SegmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 文本片段：追加到仍打开的文本段，否则新开一段
    pub fn on_text(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.text_open {
            if let Some(Segment::Text { text }) = self.segments.last_mut() {
                text.push_str(fragment);
                return;
            }
        }
        self.segments.push(Segment::Text {
            text: fragment.to_string(),
        });
        self.text_open = true;
    }

    /// 工具生命周期事件：starting -> executing -> completed | failed
    ///
    /// 同名且非终态的已开段被就地替换（位置不变）；否则新开段，并且
    /// 工具段总是截断当前文本段。终态段不会被同名新调用复用。
    pub fn on_tool_event(
        &mut self,
        name: &str,
        args: &Value,
        status: SegmentStatus,
        result: Option<String>,
        error: Option<String>,
    ) {
        for segment in self.segments.iter_mut() {
            if let Segment::ToolCall {
                name: seg_name,
                args: seg_args,
                status: seg_status,
                result: seg_result,
                error: seg_error,
            } = segment
            {
                if seg_name == name && !seg_status.is_terminal() {
                    *seg_args = args.clone();
                    *seg_status = status;
                    *seg_result = result;
                    *seg_error = error;
                    return;
                }
            }
        }

        self.segments.push(Segment::ToolCall {
            name: name.to_string(),
            args: args.clone(),
            status,
            result,
            error,
        });
        self.text_open = false;
    }

    /// 所有文本段按顺序拼接（最终回复文本）
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// 轮次结束：折叠为最终消息携带的段列表
    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_event(
        asm: &mut SegmentAssembler,
        name: &str,
        status: SegmentStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) {
        asm.on_tool_event(
            name,
            &serde_json::json!({}),
            status,
            result.map(String::from),
            error.map(String::from),
        );
    }

    #[test]
    fn text_fragments_accumulate_into_one_segment() {
        let mut asm = SegmentAssembler::new();
        asm.on_text("Hel");
        asm.on_text("lo ");
        asm.on_text("world");
        assert_eq!(asm.segments().len(), 1);
        assert_eq!(asm.text(), "Hello world");
    }

    #[test]
    fn tool_call_breaks_text_run() {
        let mut asm = SegmentAssembler::new();
        asm.on_text("before ");
        tool_event(&mut asm, "clock", SegmentStatus::Starting, None, None);
        asm.on_text("after");

        assert_eq!(asm.segments().len(), 3);
        assert!(matches!(&asm.segments()[0], Segment::Text { text } if text == "before "));
        assert!(matches!(&asm.segments()[1], Segment::ToolCall { .. }));
        assert!(matches!(&asm.segments()[2], Segment::Text { text } if text == "after"));
    }

    #[test]
    fn lifecycle_updates_merge_in_place() {
        let mut asm = SegmentAssembler::new();
        asm.on_text("checking ");
        tool_event(&mut asm, "clock", SegmentStatus::Starting, None, None);
        asm.on_text("still checking");
        tool_event(&mut asm, "clock", SegmentStatus::Executing, None, None);
        tool_event(&mut asm, "clock", SegmentStatus::Completed, Some("12:00"), None);

        // 生命周期推进不追加新段，位置保持在文本之间
        assert_eq!(asm.segments().len(), 3);
        match &asm.segments()[1] {
            Segment::ToolCall { status, result, .. } => {
                assert_eq!(*status, SegmentStatus::Completed);
                assert_eq!(result.as_deref(), Some("12:00"));
            }
            other => panic!("unexpected segment: {:?}", other),
        }
    }

    #[test]
    fn terminal_segment_is_not_reused() {
        let mut asm = SegmentAssembler::new();
        tool_event(&mut asm, "echo", SegmentStatus::Starting, None, None);
        tool_event(&mut asm, "echo", SegmentStatus::Completed, Some("one"), None);
        // 同名工具的新一次调用开新段
        tool_event(&mut asm, "echo", SegmentStatus::Starting, None, None);
        tool_event(&mut asm, "echo", SegmentStatus::Failed, None, Some("boom"));

        assert_eq!(asm.segments().len(), 2);
        assert!(matches!(
            &asm.segments()[0],
            Segment::ToolCall { status: SegmentStatus::Completed, .. }
        ));
        assert!(matches!(
            &asm.segments()[1],
            Segment::ToolCall { status: SegmentStatus::Failed, .. }
        ));
    }

    #[test]
    fn failed_segment_is_terminal() {
        let mut asm = SegmentAssembler::new();
        tool_event(&mut asm, "echo", SegmentStatus::Starting, None, None);
        tool_event(&mut asm, "echo", SegmentStatus::Failed, None, Some("boom"));
        tool_event(&mut asm, "echo", SegmentStatus::Starting, None, None);
        assert_eq!(asm.segments().len(), 2);
    }

    #[test]
    fn deterministic_for_same_event_sequence() {
        let run = || {
            let mut asm = SegmentAssembler::new();
            asm.on_text("a");
            tool_event(&mut asm, "clock", SegmentStatus::Starting, None, None);
            asm.on_text("b");
            tool_event(&mut asm, "clock", SegmentStatus::Completed, Some("t"), None);
            asm.on_text("c");
            serde_json::to_string(asm.segments()).unwrap()
        };
        // 事件之间的时间间隔不参与状态机，两次重放输出逐字节一致
        assert_eq!(run(), run());
    }

    #[test]
    fn interleaved_tools_keep_opening_order() {
        let mut asm = SegmentAssembler::new();
        tool_event(&mut asm, "clock", SegmentStatus::Starting, None, None);
        tool_event(&mut asm, "echo", SegmentStatus::Starting, None, None);
        tool_event(&mut asm, "clock", SegmentStatus::Completed, Some("t"), None);
        tool_event(&mut asm, "echo", SegmentStatus::Completed, Some("e"), None);

        let names: Vec<&str> = asm
            .segments()
            .iter()
            .map(|s| match s {
                Segment::ToolCall { name, .. } => name.as_str(),
                Segment::Text { .. } => "text",
            })
            .collect();
        assert_eq!(names, vec!["clock", "echo"]);
    }
}
