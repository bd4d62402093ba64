/// Collapse object names and namespaces in an API server path into `{name}` /
/// `{namespace}` placeholders so request metrics stay low-cardinality.
///
/// Mirrors the grouping rules of client-go's request templating.
pub fn template_path(path: &str) -> String {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    if segments.len() <= 2 {
        return path.to_owned();
    }

    // /api/v1/... for the core group, /apis/GROUP/VERSION/... for named groups
    let index = match segments[0] {
        "api" => 2,
        "apis" => 3,
        _ => return "/{prefix}".to_owned(),
    };

    match segments.len() - index {
        1 => {}
        2 => {
            // /$RESOURCE/$NAME
            segments[index + 1] = "{name}";
        }
        3 => {
            if segments[index + 2] == "status" || segments[index + 2] == "finalize" {
                // /$RESOURCE/$NAME/$SUBRESOURCE
                segments[index + 1] = "{name}";
            } else {
                // /namespaces/$NAMESPACE/$RESOURCE
                segments[index + 1] = "{namespace}";
            }
        }
        _ => {
            // /namespaces/$NAMESPACE/$RESOURCE/$NAME[/$SUBRESOURCE]
            segments[index + 1] = "{namespace}";
            if segments[index + 3] != "status" && segments[index + 3] != "finalize" {
                segments[index + 3] = "{name}";
            }
        }
    }

    format!("/{}", segments.join("/"))
}
