mod common;

use common::*;
use wormhole::commands::{ChannelRef, Command, Invoker};
use wormhole::error::RelayError;
use wormhole::router::Event;

const OWNER: u64 = 1;
const GUEST: u64 = 2;

fn admin(guild_id: u64) -> Invoker {
    Invoker {
        guild_id: Some(guild_id),
        user_id: 50 + guild_id,
        manage_guild: true,
        ban_members: true,
    }
}

fn member(guild_id: u64) -> Invoker {
    Invoker {
        guild_id: Some(guild_id),
        user_id: 80 + guild_id,
        manage_guild: false,
        ban_members: false,
    }
}

fn channel(id: u64, guild_id: u64) -> ChannelRef {
    ChannelRef { id, guild_id }
}

fn invite_code(reply: &str) -> u32 {
    let start = reply.find('`').unwrap() + 1;
    let end = start + reply[start..].find('`').unwrap();
    reply[start..end].parse().unwrap()
}

#[tokio::test]
async fn link_management_requires_manage_guild() {
    let (app, _platform) = setup().await;
    let reply = app
        .commands
        .execute(
            &member(OWNER),
            Command::CreateLink {
                channel: channel(100, OWNER),
            },
        )
        .await;
    assert_eq!(reply, "You do not have permission to create a link!");
    assert!(app.registry.channel_of(100).await.unwrap().is_none());

    let reply = app
        .commands
        .execute(
            &admin(OWNER),
            Command::CreateLink {
                channel: channel(100, GUEST),
            },
        )
        .await;
    assert_eq!(reply, "You have to be in the guild!");
}

#[tokio::test]
async fn create_invite_join_and_info() {
    let (app, _platform) = setup().await;
    let reply = app
        .commands
        .execute(
            &admin(OWNER),
            Command::CreateLink {
                channel: channel(100, OWNER),
            },
        )
        .await;
    assert!(reply.starts_with("Created link with id `"));
    let link_id = app.registry.channel_of(100).await.unwrap().unwrap().link_id;
    assert!(reply.contains(&link_id.to_string()));

    let reply = app
        .commands
        .execute(&admin(GUEST), Command::InviteCode { link_id })
        .await;
    assert_eq!(reply, "This guild does not own the link!");

    let reply = app
        .commands
        .execute(&admin(OWNER), Command::InviteCode { link_id })
        .await;
    assert!(reply.contains("expire in 15 minutes"));
    let code = invite_code(&reply);

    let reply = app
        .commands
        .execute(
            &admin(GUEST),
            Command::Join {
                code,
                channel: channel(200, GUEST),
            },
        )
        .await;
    assert_eq!(reply, "Entanglement complete!");

    let reply = app
        .commands
        .execute(
            &admin(GUEST),
            Command::Join {
                code,
                channel: channel(201, GUEST),
            },
        )
        .await;
    assert_eq!(reply, "Invalid invite code!");

    let reply = app
        .commands
        .execute(&member(GUEST), Command::Info { channel_id: 200 })
        .await;
    assert!(reply.contains(&format!("Link ID: `{}`", link_id)));
    assert!(reply.contains("Owner Guild: `1`"));
    assert!(reply.contains("Channels Linked: `2`"));
    assert!(reply.contains("**1**: <#100> (`100`)"));
    assert!(reply.contains("**2**: <#200> (`200`)"));

    let reply = app
        .commands
        .execute(&member(GUEST), Command::Info { channel_id: 999 })
        .await;
    assert_eq!(reply, "That channel is not linked!");
}

#[tokio::test]
async fn unlink_variants_check_guild_and_ownership() {
    let (app, _platform) = setup().await;
    let link = linked(&app, &[(OWNER, 100), (GUEST, 200), (3, 300)]).await;

    // A guest cannot use the owner variant.
    let err = app
        .commands
        .try_execute(
            &admin(GUEST),
            Command::UnlinkAsOwner {
                channel: channel(300, 3),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::NotAuthorized("You aren't the owner of the link!")));

    // The owner may remove another guild's channel.
    let reply = app
        .commands
        .execute(
            &admin(OWNER),
            Command::UnlinkAsOwner {
                channel: channel(300, 3),
            },
        )
        .await;
    assert_eq!(reply, "Channel has been untangled!");
    assert!(app.registry.channel_of(300).await.unwrap().is_none());

    // The self variant only accepts channels of the invoking guild.
    let reply = app
        .commands
        .execute(
            &admin(GUEST),
            Command::Unlink {
                channel: channel(100, OWNER),
            },
        )
        .await;
    assert_eq!(reply, "You have to be in the guild!");

    let reply = app
        .commands
        .execute(
            &member(GUEST),
            Command::Unlink {
                channel: channel(200, GUEST),
            },
        )
        .await;
    assert_eq!(reply, "You do not have permission to unlink!");

    let reply = app
        .commands
        .execute(
            &admin(GUEST),
            Command::Unlink {
                channel: channel(200, GUEST),
            },
        )
        .await;
    assert_eq!(reply, "Channel has been untangled!");
    assert_eq!(app.registry.members_of(link).await.unwrap().len(), 1);

    let reply = app
        .commands
        .execute(
            &admin(GUEST),
            Command::Unlink {
                channel: channel(200, GUEST),
            },
        )
        .await;
    assert_eq!(reply, "That channel is not linked!");
}

#[tokio::test]
async fn link_bans_require_ban_members() {
    let (app, _platform) = setup().await;
    let reply = app
        .commands
        .execute(&member(OWNER), Command::Ban { user_id: 9 })
        .await;
    assert_eq!(reply, "You do not have permission to ban a member from the link!");
    assert!(!app.bans.is_banned(OWNER, 9).await.unwrap());

    let reply = app
        .commands
        .execute(&admin(OWNER), Command::Ban { user_id: 9 })
        .await;
    assert!(reply.starts_with("Successfully banned <@9>"));
    assert!(app.bans.is_banned(OWNER, 9).await.unwrap());
    assert!(!app.bans.is_banned(GUEST, 9).await.unwrap());

    let reply = app
        .commands
        .execute(&admin(OWNER), Command::Unban { user_id: 9 })
        .await;
    assert!(reply.starts_with("Successfully unbanned <@9>"));
    assert!(!app.bans.is_banned(OWNER, 9).await.unwrap());
}

#[tokio::test]
async fn lookup_reports_unknown_messages() {
    let (app, platform) = setup().await;
    linked(&app, &[(OWNER, 100), (GUEST, 200)]).await;
    let mirrors = app
        .relay
        .on_message(inbound(500, OWNER, 100, 7, "hi"))
        .await
        .unwrap()
        .join()
        .await;

    let reply = app
        .commands
        .execute(
            &member(GUEST),
            Command::Lookup {
                channel_id: 200,
                message_id: 123,
            },
        )
        .await;
    assert_eq!(reply, "I couldn't find information on this message.");

    let reply = app
        .commands
        .execute(
            &member(GUEST),
            Command::Lookup {
                channel_id: 200,
                message_id: mirrors[0].message_id,
            },
        )
        .await;
    assert_eq!(reply, "DM sent!");
    let direct = platform.direct.lock().await.clone();
    assert_eq!(direct[0].0, member(GUEST).user_id);

    *platform.direct_fails.lock().await = true;
    let reply = app.commands.execute(&member(GUEST), Command::About).await;
    assert_eq!(reply, "I couldn't DM you help information! Make sure I'm not blocked!");
}

#[tokio::test]
async fn mention_pings_the_original_author() {
    let (app, platform) = setup().await;
    linked(&app, &[(OWNER, 100), (GUEST, 200)]).await;
    let mirrors = app
        .relay
        .on_message(inbound(500, OWNER, 100, 7, "hi"))
        .await
        .unwrap()
        .join()
        .await;

    let reply = app
        .commands
        .execute(
            &member(GUEST),
            Command::Mention {
                channel_id: 200,
                message_id: mirrors[0].message_id,
            },
        )
        .await;
    assert_eq!(reply, "Mentioned");
    for channel_id in [100, 200] {
        let pings = platform.sent_to(channel_id).await;
        assert_eq!(pings.len(), 1);
        assert_eq!(pings[0].content, "<@7>");
        let described = pings[0].embeds[0].description.as_deref().unwrap();
        assert!(described.contains(&format!("<@{}>", member(GUEST).user_id)));
    }

    let reply = app
        .commands
        .execute(
            &member(OWNER),
            Command::Mention {
                channel_id: 100,
                message_id: 500,
            },
        )
        .await;
    assert_eq!(reply, "Mentioned");
    assert_eq!(platform.sent_to(100).await.len(), 2);
    assert_eq!(platform.sent_to(200).await.len(), 1);

    let reply = app
        .commands
        .execute(
            &member(GUEST),
            Command::Mention {
                channel_id: 200,
                message_id: 42,
            },
        )
        .await;
    assert_eq!(reply, "I couldn't find information on this message.");

    let reply = app
        .commands
        .execute(
            &member(GUEST),
            Command::Mention {
                channel_id: 999,
                message_id: 500,
            },
        )
        .await;
    assert_eq!(reply, "That channel is not linked!");
}

#[tokio::test]
async fn about_is_sent_by_dm() {
    let (app, platform) = setup().await;
    let reply = app.commands.execute(&member(OWNER), Command::About).await;
    assert_eq!(reply, "Check your DMs!");
    let direct = platform.direct.lock().await.clone();
    assert!(direct[0].1.content.contains("/createlink"));
}

#[tokio::test]
async fn command_events_reply_in_their_channel() {
    let (app, platform) = setup().await;
    app.router
        .dispatch(Event::Command {
            invoker: admin(OWNER),
            reply_channel: 42,
            command: Command::CreateLink {
                channel: channel(100, OWNER),
            },
        })
        .await;
    let replies = platform.sent_to(42).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].content.starts_with("Created link with id"));
    assert!(app.registry.channel_of(100).await.unwrap().is_some());
}
