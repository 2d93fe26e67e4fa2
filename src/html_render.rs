//! Minimal HTML rendering of a search result page (§6). The HTML surface is
//! explicitly out of scope beyond this interface (§1); no templating crate
//! is introduced; this is plain string assembly, not a view layer.

use crate::peer::PeerStatus;
use crate::peer_list::PeerList;
use crate::query::Query;
use crate::registration::Branding;
use crate::snippet_list::SnippetList;

pub fn render(query: &Query, peers: &PeerList, snippets: &SnippetList, branding: &Branding) -> String {
    let query_text = query.get("q").unwrap_or("");

    let mut results = String::new();
    for snippet in snippets.iter() {
        let title = snippet.title.as_deref().unwrap_or("(untitled)");
        let location = snippet.location.as_deref().unwrap_or("#");
        let summary = snippet.summary.as_deref().unwrap_or("");
        results.push_str(&format!(
            "<li class=\"result\"><a href=\"{}\">{}</a><p>{}</p></li>\n",
            escape(location),
            escape(title),
            escape(summary)
        ));
    }

    let mut peer_rows = String::new();
    for entry in peers.iter() {
        let label = entry.peer.name.as_deref().unwrap_or(&entry.peer.pid);
        peer_rows.push_str(&format!(
            "<li>{} — {}</li>\n",
            escape(label),
            status_label(entry.status)
        ));
    }

    format!(
        "<!DOCTYPE html>\n<html><head><title>{trademark}</title></head><body>\n\
         <h1>{trademark}</h1><p class=\"motto\">{motto}</p>\n\
         <form action=\"/snipdex/\"><input name=\"q\" value=\"{query_text}\"/>\
         <button type=\"submit\">{button}</button></form>\n\
         <ul class=\"results\">\n{results}</ul>\n\
         <h2>Peers</h2><ul class=\"peers\">\n{peer_rows}</ul>\n\
         </body></html>\n",
        trademark = escape(&branding.trademark),
        motto = escape(&branding.motto),
        button = escape(&branding.button),
        query_text = escape(query_text),
        results = results,
        peer_rows = peer_rows,
    )
}

fn status_label(status: PeerStatus) -> &'static str {
    status.as_wire_str()
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
