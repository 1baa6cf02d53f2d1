//! Prints the OAuth2 invite URL for installing the bot with read-only
//! history permissions (add --send to include Send Messages).

const PERM_VIEW_CHANNELS: u64 = 1 << 10;
const PERM_SEND_MESSAGES: u64 = 1 << 11;
const PERM_READ_MESSAGE_HISTORY: u64 = 1 << 16;

fn invite_url(client_id: u64, with_send: bool) -> String {
    let mut permissions = PERM_VIEW_CHANNELS | PERM_READ_MESSAGE_HISTORY;
    if with_send {
        permissions |= PERM_SEND_MESSAGES;
    }
    format!(
        "https://discord.com/oauth2/authorize?client_id={client_id}&scope=bot&permissions={permissions}"
    )
}

fn main() -> anyhow::Result<()> {
    let mut client_id: Option<u64> = None;
    let mut with_send = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--send" => with_send = true,
            "--help" | "-h" => {
                println!("Usage: invite_url <CLIENT_ID> [--send]");
                return Ok(());
            }
            other => {
                client_id = Some(
                    other
                        .parse()
                        .map_err(|_| anyhow::anyhow!("CLIENT_ID {:?} is not numeric", other))?,
                );
            }
        }
    }
    let client_id =
        client_id.ok_or_else(|| anyhow::anyhow!("Usage: invite_url <CLIENT_ID> [--send]"))?;
    println!("{}", invite_url(client_id, with_send));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_permission_bits() {
        let url = invite_url(42, false);
        assert_eq!(
            url,
            "https://discord.com/oauth2/authorize?client_id=42&scope=bot&permissions=66560"
        );
        assert!(invite_url(42, true).ends_with("&permissions=68608"));
    }
}
