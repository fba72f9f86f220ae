// ========================================
// ユーティリティ関数モジュール
// ========================================
//
// このモジュールは文字列リテラルとテンプレートテキストの変換を提供します。

/// エスケープシーケンスを処理する関数
pub fn process_escape_sequences(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next_ch) = chars.next() {
                match next_ch {
                    'n' => result.push('\n'),
                    't' => result.push('\t'),
                    'r' => result.push('\r'),
                    '\\' => result.push('\\'),
                    '"' => result.push('"'),
                    '\'' => result.push('\''),
                    _ => {
                        // 認識できないエスケープシーケンスはそのまま
                        result.push('\\');
                        result.push(next_ch);
                    }
                }
            } else {
                result.push('\\');
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// HTML文字参照をデコードする
///
/// 名前付き参照は `&amp; &lt; &gt; &quot; &#39; &apos; &nbsp;` のみ。
/// 数値参照（`&#123;` / `&#x7B;`）にも対応する。不明な参照はそのまま残す。
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(amp) = rest.find('&') {
        result.push_str(&rest[..amp]);
        let tail = &rest[amp..];

        let decoded = tail.find(';').and_then(|semi| {
            let name = &tail[1..semi];
            decode_reference(name).map(|ch| (ch, semi + 1))
        });

        match decoded {
            Some((ch, consumed)) => {
                result.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                result.push('&');
                rest = &tail[1..];
            }
        }
    }

    result.push_str(rest);
    result
}

fn decode_reference(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let digits = name.strip_prefix('#')?;
            let code = match digits.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => digits.parse::<u32>().ok()?,
            };
            char::from_u32(code)
        }
    }
}
