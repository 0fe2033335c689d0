//! HTML rendering for the chat page.
//!
//! The page is a static shell; the message list is rendered server-side as a
//! fragment and swapped in whenever the view announces a change.

use std::fmt::Write as _;

use chrono::{DateTime, TimeZone, Utc};
use html_escape::{encode_double_quoted_attribute, encode_text};

use crate::chat::{DisplayList, Provenance};

/// Pixels from the top of the scroll region that trigger an older page.
const LOAD_MORE_THRESHOLD_PX: u32 = 40;

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>__TITLE__</title>
    <style>
        body { margin: 0; font-family: system-ui, sans-serif; }
        .page-header { padding: 20px; border-bottom: 1px solid #ccc; }
        .chat { max-width: 960px; margin: 0 auto; padding: 0 20px; }
        #scroll { height: 600px; overflow: auto; }
        .message { padding: 20px; margin: 8px 0; display: flex; justify-content: space-between;
                   box-shadow: rgba(0, 0, 0, 0.16) 0 1px 4px; }
        .message.live { background: #fff; }
        .message.history { background: #eee; }
        .message .time { font-size: 0.8rem; color: #aaa; }
        .loader { text-align: center; padding: 20px 0; background: #73b3d9; }
        #notice { color: #b00020; min-height: 1.2em; padding: 4px 0; }
        .composer { display: flex; gap: 8px; padding: 8px 0; }
        .composer input { flex: 1; }
    </style>
</head>
<body>
    <div class="page-header">__TITLE__</div>
    <div class="chat">
        <div id="scroll"><div id="messages"></div><div id="bottom"></div></div>
        <div id="notice" role="status"></div>
        <form id="composer" class="composer" autocomplete="off">
            <input id="draft" name="text" type="text" placeholder="Type a message">
            <button type="submit">Send</button>
        </form>
    </div>
    <script>
    (() => {
        const scroll = document.getElementById('scroll');
        const list = document.getElementById('messages');
        const notice = document.getElementById('notice');
        const draft = document.getElementById('draft');
        let viewId = null;
        let requesting = false;

        const api = (path, options) => fetch(`/api/views/${viewId}${path}`, options);
        const state = () => list.firstElementChild ? list.firstElementChild.dataset : {};

        async function refresh() {
            const response = await api('/messages/html');
            if (response.ok) list.innerHTML = await response.text();
        }

        function toBottom() {
            document.getElementById('bottom').scrollIntoView();
        }

        async function keepPosition(update) {
            const before = scroll.scrollHeight;
            await update();
            scroll.scrollTop += scroll.scrollHeight - before;
        }

        async function loadOlder() {
            const { hasMore, loading } = state();
            if (requesting || hasMore !== 'true' || loading === 'true') return;
            requesting = true;
            try {
                await api('/older', { method: 'POST' });
            } finally {
                requesting = false;
            }
        }

        async function mount() {
            const response = await fetch('/api/views', { method: 'POST' });
            if (!response.ok) {
                notice.textContent = 'Could not open the chat.';
                return;
            }
            viewId = (await response.json()).view_id;

            const events = new EventSource(`/api/views/${viewId}/stream`);
            events.addEventListener('live.changed', async (e) => {
                const data = JSON.parse(e.data).data;
                if (data.scroll_to_bottom) {
                    await refresh();
                    toBottom();
                } else {
                    await keepPosition(refresh);
                }
            });
            for (const name of ['history.loading', 'history.prepended', 'history.reset', 'history.removed']) {
                events.addEventListener(name, () => keepPosition(refresh));
            }
            events.addEventListener('notice', async (e) => {
                notice.textContent = JSON.parse(e.data).data.message;
                await keepPosition(refresh);
            });

            await refresh();
            toBottom();
        }

        scroll.addEventListener('scroll', () => {
            if (scroll.scrollTop <= __THRESHOLD__) loadOlder();
        });

        list.addEventListener('click', (e) => {
            const id = e.target.dataset.delete;
            if (id) api(`/messages/${encodeURIComponent(id)}`, { method: 'DELETE' });
        });

        document.getElementById('composer').addEventListener('submit', async (e) => {
            e.preventDefault();
            const response = await api('/messages', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ text: draft.value }),
            });
            if (response.ok && (await response.json()).outcome === 'sent') {
                draft.value = '';
                notice.textContent = '';
            }
        });

        window.addEventListener('pagehide', () => {
            if (viewId) fetch(`/api/views/${viewId}`, { method: 'DELETE', keepalive: true });
        });

        mount();
    })();
    </script>
</body>
</html>
"#;

/// Full chat page shell.
pub fn page(title: &str) -> String {
    PAGE_TEMPLATE
        .replace("__TITLE__", &encode_text(title))
        .replace("__THRESHOLD__", &LOAD_MORE_THRESHOLD_PX.to_string())
}

/// Message list fragment: optional loader, history rows, then live rows.
///
/// The wrapper carries `data-has-more` and `data-loading` for the scroll handler.
pub fn message_list(display: &DisplayList, now: DateTime<Utc>) -> String {
    let mut html = String::new();
    let _ = write!(
        html,
        r#"<div class="message-list" data-has-more="{}" data-loading="{}">"#,
        display.has_more, display.loading
    );
    if display.loading {
        html.push_str(r#"<div class="loader">Loading...</div>"#);
    }

    for item in &display.items {
        let class = match item.provenance {
            Provenance::History => "history",
            Provenance::Live => "live",
        };
        let id = encode_double_quoted_attribute(item.message.id.as_str());
        let _ = write!(
            html,
            r#"<article class="message {class}" data-id="{id}"><div><span class="text">{text}</span><div class="time">{time}</div></div><button type="button" data-delete="{id}">Delete</button></article>"#,
            text = encode_text(&item.message.text),
            time = relative_label(item.message.date, now),
        );
    }

    html.push_str("</div>");
    html
}

/// Human-readable distance between `date_ms` and `now`, e.g. "5 minutes ago".
pub fn relative_label(date_ms: i64, now: DateTime<Utc>) -> String {
    let Some(date) = Utc.timestamp_millis_opt(date_ms).single() else {
        return String::new();
    };
    let delta = now.signed_duration_since(date);
    let future = delta.num_milliseconds() < 0;
    let seconds = delta.num_seconds().abs();

    let minutes = (seconds + 30) / 60;
    let hours = (seconds + 1800) / 3600;
    let days = (seconds + 43_200) / 86_400;

    let span = match seconds {
        0..45 => "a few seconds".to_string(),
        45..90 => "a minute".to_string(),
        90..2_700 => format!("{minutes} minutes"),
        2_700..5_400 => "an hour".to_string(),
        5_400..79_200 => format!("{hours} hours"),
        79_200..129_600 => "a day".to_string(),
        129_600..2_246_400 => format!("{days} days"),
        2_246_400..3_888_000 => "a month".to_string(),
        3_888_000..27_648_000 => format!("{} months", (days + 15) / 30),
        27_648_000..47_347_200 => "a year".to_string(),
        _ => format!("{} years", (days + 182) / 365),
    };

    if future {
        format!("in {span}")
    } else {
        format!("{span} ago")
    }
}
