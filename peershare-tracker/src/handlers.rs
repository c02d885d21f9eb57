//! One handler per client RPC.
//!
//! Each handler validates its preconditions, mutates state under the
//! exclusive lock, then schedules persistence and gossip after the lock is
//! released. The `propagate` flag is threaded through every mutating
//! handler: the sync path applies the same mutations with `propagate =
//! false` so a gossip-applied command never re-broadcasts.

use peershare_common::{
    ChunkInfo, ContentHash, FileEntry, FileInfo, GroupCreated, Response, UploadAck, CHUNK_SIZE,
};
use tracing::info;

use crate::server::Tracker;
use crate::state::{file_key, FileRecord, Group, User};

impl Tracker {
    pub fn create_user(&self, args: &[String], propagate: bool) -> Response {
        let [user, pass] = args else {
            return Response::error("create_user: need user, pass");
        };

        {
            let mut state = self.state.write();
            if state.users.contains_key(user) {
                return Response::error("user exists");
            }
            state.users.insert(
                user.clone(),
                User {
                    user_id: user.clone(),
                    password: pass.clone(),
                    logged_in: false,
                    addr: String::new(),
                },
            );
        }

        info!("user {user} created");
        self.after_write(propagate, "sync_create_user", args);
        Response::ok("user created")
    }

    pub fn login(&self, args: &[String], propagate: bool) -> Response {
        let [user, pass, addr] = args else {
            return Response::error("login: need user, pass, addr");
        };

        {
            let mut state = self.state.write();
            let Some(u) = state.users.get_mut(user) else {
                return Response::error("invalid credentials");
            };
            if u.password != *pass {
                return Response::error("invalid credentials");
            }
            u.logged_in = true;
            u.addr = addr.clone();
        }

        info!("user {user} logged in");
        // The password stays out of gossip; peers only need the session bits.
        self.after_write(propagate, "sync_login", &[user.clone(), addr.clone()]);
        Response::ok("logged in")
    }

    pub fn update_address(&self, args: &[String], propagate: bool) -> Response {
        let [user, addr] = args else {
            return Response::error("update_address: need user, addr");
        };

        {
            let mut state = self.state.write();
            let Some(u) = state.users.get_mut(user) else {
                return Response::error("user not found");
            };
            if !u.logged_in {
                return Response::error("user not logged in");
            }
            u.addr = addr.clone();
        }

        info!("updated address for {user} to {addr}");
        self.after_write(propagate, "sync_update_address", args);
        Response::ok("address updated")
    }

    pub fn create_group(&self, args: &[String], propagate: bool) -> Response {
        let [group_id, user] = args else {
            return Response::error("create_group: need group_id, user");
        };

        {
            let mut state = self.state.write();
            if state.groups.contains_key(group_id) {
                return Response::error("group exists");
            }
            state
                .groups
                .insert(group_id.clone(), Group::new(group_id.clone(), user.clone()));
        }

        info!("group {group_id} created with owner {user}");
        self.after_write(propagate, "sync_create_group", args);
        Response::ok(GroupCreated {
            group_id: group_id.clone(),
            owner: user.clone(),
            message: "group created".into(),
        })
    }

    pub fn join_group(&self, args: &[String], propagate: bool) -> Response {
        let [group_id, user] = args else {
            return Response::error("join_group: need group_id, user");
        };

        {
            let mut state = self.state.write();
            let Some(g) = state.groups.get_mut(group_id) else {
                return Response::error("group not found");
            };
            if g.members.contains(user) {
                // Members never land back in pending.
                return Response::ok("already a member");
            }
            g.pending.insert(user.clone());
        }

        info!("{user} requested to join group {group_id}");
        self.after_write(propagate, "sync_join_group", args);
        Response::ok("request sent")
    }

    pub fn list_requests(&self, args: &[String]) -> Response {
        let [group_id, user] = args else {
            return Response::error("list_requests: need group_id, owner");
        };

        let state = self.state.read();
        let Some(g) = state.groups.get(group_id) else {
            return Response::error("group not found");
        };
        if g.owner != *user {
            return Response::error("not owner");
        }
        Response::ok(g.pending.iter().cloned().collect::<Vec<_>>())
    }

    pub fn accept_request(&self, args: &[String], propagate: bool) -> Response {
        let [group_id, owner, user] = args else {
            return Response::error("accept_requests: need group_id, owner, user");
        };

        {
            let mut state = self.state.write();
            let Some(g) = state.groups.get_mut(group_id) else {
                return Response::error("group not found");
            };
            if g.owner != *owner {
                return Response::error("not owner");
            }
            g.pending.remove(user);
            g.members.insert(user.clone());
        }

        info!("accepted {user} into group {group_id}");
        self.after_write(
            propagate,
            "sync_accept_request",
            &[group_id.clone(), user.clone()],
        );
        Response::ok("request accepted")
    }

    pub fn leave_group(&self, args: &[String], propagate: bool) -> Response {
        let [group_id, user] = args else {
            return Response::error("leave_group: need group_id, user");
        };

        {
            let mut state = self.state.write();
            let Some(g) = state.groups.get_mut(group_id) else {
                return Response::error("group not found");
            };
            if g.owner == *user {
                return Response::error("owner cannot leave");
            }
            if !g.members.remove(user) {
                return Response::error("not a member");
            }
        }

        info!("{user} left group {group_id}");
        self.after_write(propagate, "sync_leave_group", args);
        Response::ok("left group")
    }

    pub fn upload_file(&self, args: &[String], propagate: bool) -> Response {
        let [file_name, group_id, user, file_size, file_hash, chunks_json] = args else {
            return Response::error(
                "upload_file: need file_name, group_id, user, size, file_hash, chunks",
            );
        };

        let Ok(size) = file_size.parse::<u64>() else {
            return Response::error("invalid chunk data");
        };
        if size == 0 {
            return Response::error("empty file");
        }
        let Ok(hash) = ContentHash::from_hex(file_hash) else {
            return Response::error("invalid chunk data");
        };
        let Ok(chunks) = serde_json::from_str::<Vec<ChunkInfo>>(chunks_json) else {
            return Response::error("invalid chunk data");
        };
        // The tracker trusts the chunk hashes as supplied, but the manifest
        // must at least describe the advertised size.
        if chunks.is_empty() || chunks.iter().map(|c| c.size).sum::<u64>() != size {
            return Response::error("invalid chunk data");
        }

        let total_chunks = chunks.len() as u32;
        {
            let mut state = self.state.write();
            let Some(g) = state.groups.get(group_id) else {
                return Response::error("group not found");
            };
            if !g.members.contains(user) {
                return Response::error("not a member");
            }
            let key = file_key(group_id, file_name);
            if state.files.contains_key(&key) {
                return Response::error("file already exists in group");
            }
            state.files.insert(
                key,
                FileRecord {
                    file_name: file_name.clone(),
                    group_id: group_id.clone(),
                    uploader: user.clone(),
                    file_size: size,
                    file_hash: hash,
                    chunk_size: CHUNK_SIZE,
                    total_chunks,
                    chunks,
                    owners: [user.clone()].into(),
                },
            );
        }

        info!("file {file_name} ({size} bytes) uploaded to group {group_id} by {user}");
        self.after_write(propagate, "sync_upload_file", args);
        Response::ok(UploadAck {
            message: "file uploaded successfully".into(),
            file_name: file_name.clone(),
            group_id: group_id.clone(),
            file_size: size,
            uploader: user.clone(),
            file_hash: hash,
            total_chunks,
        })
    }

    pub fn list_files(&self, args: &[String]) -> Response {
        let (group_id, requesting_user) = match args {
            [group_id] => (group_id, None),
            [group_id, user, ..] => (group_id, Some(user)),
            _ => return Response::error("list_files: need group_id"),
        };

        let state = self.state.read();
        let Some(g) = state.groups.get(group_id) else {
            return Response::error("group not found");
        };
        // Membership is enforced whenever the caller identifies itself.
        if let Some(user) = requesting_user {
            if !g.members.contains(user) {
                return Response::error("not a member");
            }
        }

        let mut entries: Vec<FileEntry> = state
            .files
            .values()
            .filter(|f| f.group_id == *group_id)
            .map(|f| FileEntry {
                file_name: f.file_name.clone(),
                file_size: f.file_size,
                uploader: f.uploader.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Response::ok(entries)
    }

    pub fn get_file_info(&self, args: &[String]) -> Response {
        let (group_id, file_name, requesting_user) = match args {
            [group_id, file_name] => (group_id, file_name, None),
            [group_id, file_name, user, ..] => (group_id, file_name, Some(user)),
            _ => return Response::error("get_file_info: need group_id, file_name"),
        };

        let state = self.state.read();
        if let Some(user) = requesting_user {
            let Some(g) = state.groups.get(group_id) else {
                return Response::error("group not found");
            };
            if !g.members.contains(user) {
                return Response::error("not a member");
            }
        }
        let Some(file) = state.files.get(&file_key(group_id, file_name)) else {
            return Response::error("file not found");
        };

        // Only owners that are currently logged in can serve chunks; offline
        // owners are silently omitted.
        let peers: Vec<String> = file
            .owners
            .iter()
            .filter_map(|owner| state.users.get(owner))
            .filter(|u| u.logged_in && !u.addr.is_empty())
            .map(|u| u.addr.clone())
            .collect();

        Response::ok(FileInfo {
            file_name: file.file_name.clone(),
            file_hash: file.file_hash,
            file_size: file.file_size,
            chunk_size: file.chunk_size,
            total_chunks: file.total_chunks,
            chunks: file.chunks.clone(),
            peers,
        })
    }

    pub fn list_groups(&self) -> Response {
        let state = self.state.read();
        let mut groups: Vec<String> = state.groups.keys().cloned().collect();
        groups.sort();
        Response::ok(groups)
    }

    pub fn stop_sharing(&self, args: &[String], propagate: bool) -> Response {
        let [group_id, file_name, user] = args else {
            return Response::error("stop_sharing: need group_id, file_name, user");
        };

        let file_removed = {
            let mut state = self.state.write();
            let key = file_key(group_id, file_name);
            let Some(file) = state.files.get_mut(&key) else {
                return Response::error("file not found");
            };
            file.owners.remove(user);
            if file.owners.is_empty() {
                state.files.remove(&key);
                true
            } else {
                false
            }
        };

        self.after_write(propagate, "sync_stop_sharing", args);
        if file_removed {
            info!("file {file_name} removed from group {group_id} (no owners left)");
            Response::ok("file removed (no owners)")
        } else {
            info!("{user} stopped sharing {file_name} in group {group_id}");
            Response::ok("stopped sharing")
        }
    }

    pub fn add_seeder(&self, args: &[String], propagate: bool) -> Response {
        let [group_id, file_name, user] = args else {
            return Response::error("add_seeder: need group_id, file_name, user");
        };

        {
            let mut state = self.state.write();
            if !state.groups.contains_key(group_id) {
                return Response::error("group not found");
            }
            let Some(file) = state.files.get_mut(&file_key(group_id, file_name)) else {
                return Response::error("file not found");
            };
            file.owners.insert(user.clone());
        }

        info!("{user} is now seeding {file_name} in group {group_id}");
        self.after_write(propagate, "sync_add_seeder", args);
        Response::ok("registered as seeder")
    }
}
