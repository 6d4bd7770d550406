//! Stream Demo: feeds a canned answer through the engine from a producer thread.
//!
//! Surface events are logged as they happen; once the stream ends the final
//! tree is printed with terminal styling.
//!
//! Set `RUST_LOG=inkstream=debug` to see the engine's own spans.

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor, Stylize};
use crossterm::execute;
use inkstream::{
    EngineConfig, Error, MarkupRule, Node, NodeFlags, NodeKind, StreamEngine, StreamMessage,
    SurfaceEvent, TickerActor,
};
use std::io::{stdout, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Sample text to stream (simulating an assistant response).
const SAMPLE_TEXT: &str = r#"Here is how the renderer keeps up with a fast stream.

## Snapshots

Each render transpiles the whole buffer and **patches** only the blocks that
changed, so a growing paragraph keeps its identity. ==Highlighted== spans come
from a custom markup rule.

```rust
fn main() {
    for token in stream() {
        render(token);
    }
}
```

:::note
Custom fences stream exactly like code.
:::

- cadence grows with each render
- code blocks promote in chunks
- plain prose skips snapshots entirely
"#;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut engine = StreamEngine::new(EngineConfig::default());
    engine.set_markup_rules(vec![
        MarkupRule::tree("highlight", "==", "==", true),
        MarkupRule::fence("note", ":::note", ":::", "text"),
    ])?;

    let tx = engine.attach_bridge();
    let producer = thread::spawn(move || {
        tx.send(StreamMessage::Begin);
        for token in SAMPLE_TEXT.split_inclusive([' ', '\n']) {
            tx.text("answer", token);
            thread::sleep(Duration::from_millis(8));
        }
        tx.send(StreamMessage::End);
    });

    let mut ticker = TickerActor::spawn(Duration::from_millis(16))?;
    let mut out = stdout();
    let started = Instant::now();
    loop {
        let ticks = engine.pump(&mut ticker, 1);
        for event in engine.drain_events() {
            log_event(&mut out, started, &event)?;
        }
        if ticks == 0 && engine.is_idle() {
            break;
        }
    }
    ticker.shutdown();
    ticker.join();
    let _ = producer.join();

    println!();
    for block in engine.tree().blocks() {
        print_block(block, 0);
    }

    let stats = engine.stats();
    execute!(
        out,
        SetForegroundColor(Color::DarkGrey),
        Print(format!(
            "\n{} chunks, {} renders, {} promotions, {} morphs, {} code blocks\n",
            stats.chunks,
            stats.full_renders,
            stats.promotions,
            stats.tree.morphs,
            stats.tree.code_blocks_created
        )),
        ResetColor
    )?;
    out.flush()?;
    Ok(())
}

fn log_event(out: &mut impl Write, started: Instant, event: &SurfaceEvent) -> std::io::Result<()> {
    let line = match event {
        SurfaceEvent::Patched { start, removed, inserted } => {
            format!("patched at {start}: -{removed} +{inserted}")
        }
        SurfaceEvent::CodeUpdated(id) => format!("code {} updated", id.get()),
        SurfaceEvent::ScrollFollow(_) => return Ok(()),
        SurfaceEvent::Cleared => "cleared".to_string(),
        SurfaceEvent::Resync => "resync: events dropped, re-reading tree".to_string(),
    };
    execute!(
        out,
        SetForegroundColor(Color::DarkGrey),
        Print(format!("[{:>5}ms] ", started.elapsed().as_millis())),
        ResetColor,
        Print(line),
        Print("\n")
    )
}

fn print_block(node: &Node, depth: usize) {
    let indent = "  ".repeat(depth);
    match &node.kind {
        NodeKind::Heading(level) => {
            let marker = "#".repeat(usize::from(*level));
            println!("{indent}{} {}", marker.cyan(), node.text_content().bold());
        }
        NodeKind::CodeBlock(code) => {
            let style = if node.flags.contains(NodeFlags::HIGHLIGHTED) {
                "highlighted"
            } else {
                "plain"
            };
            println!("{indent}{}", format!("[{} | {style}]", code.lang).dark_grey());
            for line in code.source.lines() {
                println!("{indent}  {}", line.green());
            }
        }
        NodeKind::List { .. } | NodeKind::Item | NodeKind::BlockQuote => {
            for child in &node.children {
                print_block(child, depth + 1);
            }
        }
        _ => println!("{indent}{}", node.text_content()),
    }
}
